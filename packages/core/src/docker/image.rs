//! Image build, tag and push
//!
//! Builds stream the artifact directory to the daemon as a gzipped tar and
//! follow BuildKit progress. Failures carry the tail of the build output
//! plus a suggestion for the common causes.

use super::progress::ProgressReporter;
use super::reference::ImageReference;
use super::runtime::BuildRequest;
use super::{DockerClient, DockerError};
use crate::config::RegistryCredentials;
use crate::versions::VersionSet;
use bollard::auth::DockerCredentials;
use bollard::moby::buildkit::v1::StatusResponse as BuildkitStatusResponse;
use bollard::models::BuildInfoAux;
use bollard::query_parameters::{
    BuildImageOptions, BuilderVersion, PushImageOptionsBuilder, TagImageOptionsBuilder,
};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use futures_util::StreamExt;
use http_body_util::{Either, Full};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tar::Builder as TarBuilder;
use tracing::{debug, info};

/// Recent build log lines kept for error context
const BUILD_LOG_BUFFER_SIZE: usize = 20;

/// Error-looking lines kept separately so they survive scrolling
const ERROR_LOG_BUFFER_SIZE: usize = 10;

pub const LABEL_TITLE: &str = "org.opencontainers.image.title";
pub const LABEL_VERSION: &str = "org.opencontainers.image.version";
pub const LABEL_CREATED: &str = "org.opencontainers.image.created";
pub const LABEL_PHP_VERSION: &str = "org.mediawiki.image.php-version";

const LABEL_TITLE_VALUE: &str = "mediawiki";

/// Docker Hub's legacy auth endpoint, as the daemon expects it
const DOCKER_HUB_SERVER_ADDRESS: &str = "https://index.docker.io/v1/";

/// OCI labels for a build
///
/// Labels travel with the build request rather than the Dockerfile so the
/// generated files stay identical between runs.
pub fn image_labels(versions: &VersionSet, created: DateTime<Utc>) -> HashMap<String, String> {
    HashMap::from([
        (LABEL_TITLE.to_string(), LABEL_TITLE_VALUE.to_string()),
        (
            LABEL_VERSION.to_string(),
            versions.mediawiki_version().to_string(),
        ),
        (
            LABEL_CREATED.to_string(),
            created.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        (
            LABEL_PHP_VERSION.to_string(),
            versions.php_version().to_string(),
        ),
    ])
}

fn is_error_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("error")
        || lower.contains("failed")
        || lower.contains("cannot")
        || lower.contains("unable to")
        || lower.contains("not found")
        || lower.contains("permission denied")
}

/// Build an image from `context_dir`
///
/// Returns the image id reported by the daemon, or the tag when the daemon
/// does not report one.
pub async fn build_image(
    client: &DockerClient,
    context_dir: &Path,
    request: &BuildRequest,
    progress: &mut ProgressReporter,
) -> Result<String, DockerError> {
    debug!(
        "Building image {} from {} (no_cache: {})",
        request.tag,
        context_dir.display(),
        request.no_cache
    );

    let context = create_build_context(context_dir).map_err(|e| {
        DockerError::Build(format!(
            "Failed to create build context from {}: {e}",
            context_dir.display()
        ))
    })?;

    // BuildKit requires a unique session id per build
    let session_id = format!(
        "mediawiki-image-build-{}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );
    let options = BuildImageOptions {
        t: Some(request.tag.clone()),
        dockerfile: "Dockerfile".to_string(),
        version: BuilderVersion::BuilderBuildKit,
        session: Some(session_id),
        rm: true,
        nocache: request.no_cache,
        buildargs: Some(request.build_args.clone()),
        labels: Some(request.labels.clone()),
        platform: String::new(),
        target: String::new(),
        ..Default::default()
    };

    let body: Either<Full<Bytes>, _> = Either::Left(Full::new(Bytes::from(context)));
    let mut stream = client.inner().build_image(options, None, Some(body));

    progress.add_spinner("build", "Initializing...");

    let mut maybe_image_id = None;
    let mut log_state = BuildLogState::new();

    while let Some(result) = stream.next().await {
        let info = match result {
            Ok(info) => info,
            Err(e) => {
                return Err(handle_stream_error(
                    "Build failed",
                    e.to_string(),
                    &log_state,
                    progress,
                ));
            }
        };

        handle_stream_message(&info, progress, &mut log_state);

        if let Some(error_detail) = &info.error_detail
            && let Some(error_msg) = &error_detail.message
        {
            progress.abandon_all(error_msg);
            return Err(DockerError::Build(format_build_error_with_context(
                error_msg,
                &log_state.recent_logs,
                &log_state.error_logs,
                &log_state.recent_buildkit_logs,
            )));
        }

        if let Some(aux) = info.aux {
            match aux {
                BuildInfoAux::Default(image_id) => {
                    if let Some(id) = image_id.id {
                        maybe_image_id = Some(id);
                    }
                }
                BuildInfoAux::BuildKit(status) => {
                    handle_buildkit_status(&status, progress, &mut log_state);
                }
            }
        }
    }

    let image_id = maybe_image_id.unwrap_or_else(|| request.tag.clone());
    progress.finish("build", &format!("Build complete: {image_id}"));
    info!("Built {} ({})", request.tag, image_id);

    Ok(image_id)
}

struct BuildLogState {
    recent_logs: VecDeque<String>,
    error_logs: VecDeque<String>,
    recent_buildkit_logs: VecDeque<String>,
    vertex_name_by_vertex_id: HashMap<String, String>,
}

impl BuildLogState {
    fn new() -> Self {
        Self {
            recent_logs: VecDeque::with_capacity(BUILD_LOG_BUFFER_SIZE),
            error_logs: VecDeque::with_capacity(ERROR_LOG_BUFFER_SIZE),
            recent_buildkit_logs: VecDeque::with_capacity(BUILD_LOG_BUFFER_SIZE),
            vertex_name_by_vertex_id: HashMap::new(),
        }
    }

    fn push_log(&mut self, line: &str) {
        push_bounded(&mut self.recent_logs, line.to_string(), BUILD_LOG_BUFFER_SIZE);
        if is_error_line(line) {
            push_bounded(&mut self.error_logs, line.to_string(), ERROR_LOG_BUFFER_SIZE);
        }
    }
}

fn push_bounded(buffer: &mut VecDeque<String>, line: String, capacity: usize) {
    if buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(line);
}

fn handle_stream_message(
    info: &bollard::models::BuildInfo,
    progress: &mut ProgressReporter,
    state: &mut BuildLogState,
) {
    let Some(stream_msg) = info.stream.as_deref() else {
        return;
    };
    let msg = stream_msg.trim();
    if msg.is_empty() {
        return;
    }

    if progress.is_plain_output() {
        eprint!("{stream_msg}");
    } else {
        progress.update_spinner("build", msg);
    }

    state.push_log(msg);

    if msg.starts_with("Step ") {
        debug!("Build step: {}", msg);
    }
}

fn handle_buildkit_status(
    status: &BuildkitStatusResponse,
    progress: &mut ProgressReporter,
    state: &mut BuildLogState,
) {
    for vertex in &status.vertexes {
        if vertex.name.is_empty() {
            continue;
        }
        state
            .vertex_name_by_vertex_id
            .entry(vertex.digest.clone())
            .or_insert_with(|| vertex.name.clone());
    }

    // The newest named step that is not BuildKit bookkeeping
    if let Some(name) = status
        .vertexes
        .iter()
        .rev()
        .map(|vertex| vertex.name.as_str())
        .find(|name| !name.is_empty() && !name.starts_with("[internal]"))
    {
        if progress.is_plain_output() {
            eprintln!("{name}");
        } else {
            progress.update_spinner("build", name);
        }
    }

    for log in &status.logs {
        let message = String::from_utf8_lossy(&log.msg)
            .replace('\r', "")
            .trim_end()
            .to_string();
        if message.is_empty() {
            continue;
        }
        let name = state
            .vertex_name_by_vertex_id
            .get(&log.vertex)
            .cloned()
            .unwrap_or_else(|| format_vertex_fallback_label(&log.vertex));
        if progress.is_plain_output() {
            eprintln!("[{name}] {message}");
        }
        for line in message.lines() {
            if is_error_line(line) {
                push_bounded(
                    &mut state.error_logs,
                    line.trim().to_string(),
                    ERROR_LOG_BUFFER_SIZE,
                );
            }
        }
        push_bounded(
            &mut state.recent_buildkit_logs,
            format!("[{name}] {message}"),
            BUILD_LOG_BUFFER_SIZE,
        );
    }
}

fn format_vertex_fallback_label(vertex_id: &str) -> String {
    let short = vertex_id
        .strip_prefix("sha256:")
        .unwrap_or(vertex_id)
        .chars()
        .take(12)
        .collect::<String>();
    format!("vertex {short}")
}

fn handle_stream_error(
    prefix: &str,
    error_str: String,
    state: &BuildLogState,
    progress: &mut ProgressReporter,
) -> DockerError {
    progress.abandon_all(prefix);
    DockerError::Build(format_build_error_with_context(
        &error_str,
        &state.recent_logs,
        &state.error_logs,
        &state.recent_buildkit_logs,
    ))
}

/// Format a build error with recent log context for actionable debugging
fn format_build_error_with_context(
    error: &str,
    recent_logs: &VecDeque<String>,
    error_logs: &VecDeque<String>,
    recent_buildkit_logs: &VecDeque<String>,
) -> String {
    let mut message = String::from(error);

    // Error-like lines that already scrolled out of the recent window
    if !error_logs.is_empty() {
        let recent_set: HashSet<&String> = recent_logs.iter().collect();
        let unique_errors: Vec<&String> = error_logs
            .iter()
            .filter(|line| !recent_set.contains(line))
            .collect();

        if !unique_errors.is_empty() {
            message.push_str("\n\nPotential errors detected during build:");
            for line in unique_errors {
                message.push_str("\n  ");
                message.push_str(line);
            }
        }
    }

    if !recent_buildkit_logs.is_empty() {
        message.push_str("\n\nRecent BuildKit output:");
        for line in recent_buildkit_logs {
            message.push_str("\n  ");
            message.push_str(line);
        }
    }

    if !recent_logs.is_empty() {
        message.push_str("\n\nRecent build output:");
        for line in recent_logs {
            message.push_str("\n  ");
            message.push_str(line);
        }
    } else if recent_buildkit_logs.is_empty() {
        message.push_str("\n\nNo build output was received from the Docker daemon.");
        message.push_str("\nThis usually means the build failed before any logs were streamed.");
    }

    let error_lower = error.to_lowercase();
    if error_lower.contains("network")
        || error_lower.contains("connection")
        || error_lower.contains("timeout")
        || error_lower.contains("temporary failure in name resolution")
    {
        message.push_str("\n\nSuggestion: Check your network connection and Docker's ability to reach the internet.");
    } else if error_lower.contains("no space") || error_lower.contains("disk") {
        message.push_str("\n\nSuggestion: Free up disk space with 'docker system prune' or check available storage.");
    } else if error_lower.contains("permission") || error_lower.contains("denied") {
        message.push_str("\n\nSuggestion: Check Docker permissions. You may need to add your user to the 'docker' group.");
    } else if error_logs
        .iter()
        .any(|line| line.contains("no php-fpm package available"))
    {
        message.push_str("\n\nSuggestion: The requested PHP version is not packaged for the base image. Pin another with --php-version.");
    } else if error_logs
        .iter()
        .any(|line| line.contains("missing PHP extensions"))
    {
        message.push_str("\n\nSuggestion: Some PHP extensions are not packaged for this PHP version. Drop --strict-extensions to continue without them.");
    }

    message
}

/// Gzipped tar of the regular files directly inside `dir`
///
/// Entries are sorted by name and keep their permission bits, so the
/// health-check script stays executable inside the image.
fn create_build_context(dir: &Path) -> Result<Vec<u8>, std::io::Error> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            entries.push((entry.file_name(), metadata));
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut archive_buffer = Vec::new();
    {
        let encoder = GzEncoder::new(&mut archive_buffer, Compression::default());
        let mut tar = TarBuilder::new(encoder);

        for (name, metadata) in entries {
            let contents = std::fs::read(dir.join(&name))?;
            let mut header = tar::Header::new_gnu();
            header.set_path(&name)?;
            header.set_size(contents.len() as u64);
            header.set_mode(file_mode(&metadata));
            header.set_cksum();
            tar.append(&header, contents.as_slice())?;
        }
        tar.finish()?;

        let encoder = tar.into_inner()?;
        encoder.finish()?;
    }

    Ok(archive_buffer)
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

/// Point another tag at an existing local image
pub async fn tag_image(
    client: &DockerClient,
    source: &str,
    target: &ImageReference,
) -> Result<(), DockerError> {
    debug!("Tagging {} as {}", source, target);
    let options = TagImageOptionsBuilder::new()
        .repo(&target.repository())
        .tag(target.tag())
        .build();
    client
        .inner()
        .tag_image(source, Some(options))
        .await
        .map_err(|e| DockerError::Image(format!("Failed to tag {source} as {target}: {e}")))
}

fn docker_credentials(
    reference: &ImageReference,
    credentials: &RegistryCredentials,
) -> DockerCredentials {
    let serveraddress = if reference.is_docker_hub() {
        DOCKER_HUB_SERVER_ADDRESS.to_string()
    } else {
        reference.registry().to_string()
    };
    DockerCredentials {
        username: Some(credentials.username.clone()),
        password: Some(credentials.token.clone()),
        serveraddress: Some(serveraddress),
        ..Default::default()
    }
}

/// Push one tag to its registry
pub async fn push_image(
    client: &DockerClient,
    reference: &ImageReference,
    credentials: &RegistryCredentials,
    progress: &mut ProgressReporter,
) -> Result<(), DockerError> {
    let id = format!("push-{}", reference.tag());
    debug!("Pushing {}", reference);

    let options = PushImageOptionsBuilder::new().tag(reference.tag()).build();
    let mut stream = client.inner().push_image(
        &reference.repository(),
        Some(options),
        Some(docker_credentials(reference, credentials)),
    );

    progress.add_spinner(&id, &format!("Pushing {reference}..."));

    while let Some(result) = stream.next().await {
        let info = match result {
            Ok(info) => info,
            Err(e) => {
                progress.abandon_all("Push failed");
                return Err(DockerError::Push(format!("{reference}: {e}")));
            }
        };

        if let Some(error_detail) = &info.error_detail
            && let Some(error_msg) = &error_detail.message
        {
            progress.abandon_all(error_msg);
            return Err(DockerError::Push(format!("{reference}: {error_msg}")));
        }

        if let Some(status) = &info.status {
            if progress.is_plain_output() {
                eprintln!("{reference}: {status}");
            } else {
                progress.update_spinner(&id, &format!("{reference}: {status}"));
            }
        }
    }

    progress.finish(&id, &format!("Pushed {reference}"));
    info!("Pushed {}", reference);
    Ok(())
}
