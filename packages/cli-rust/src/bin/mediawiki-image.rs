//! mediawiki-image - build, smoke-test and publish MediaWiki container images

use console::style;

fn main() {
    if let Err(e) = mediawiki_image::run() {
        eprintln!("{} {e:#}", style("Error:").red().bold());
        std::process::exit(1);
    }
}
