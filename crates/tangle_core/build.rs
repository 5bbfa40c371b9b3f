use rustc_version::{version_meta, Channel};

// Enables `doc_auto_cfg` on nightly so feature-gated items are labelled on docs.rs.
fn main() {
    println!("cargo:rustc-check-cfg=cfg(CHANNEL_NIGHTLY)");
    if let Ok(meta) = version_meta() {
        if meta.channel == Channel::Nightly {
            println!("cargo:rustc-cfg=CHANNEL_NIGHTLY");
        }
    }
}
