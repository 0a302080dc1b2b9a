//! mwi - short alias for mediawiki-image

use console::style;

fn main() {
    if let Err(e) = mediawiki_image::run() {
        eprintln!("{} {e:#}", style("Error:").red().bold());
        std::process::exit(1);
    }
}
