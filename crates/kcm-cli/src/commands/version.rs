//! Version command

/// Print `kcm <version>`
pub fn run() {
    println!("kcm {}", env!("CARGO_PKG_VERSION"));
}
