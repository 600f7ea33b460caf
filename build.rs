fn main() {
    // Build scripts run on the host, so check the target through cargo's env instead of #[cfg].
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "macos" {
        return;
    }

    println!("cargo:rerun-if-changed=native/virtual_display_shim.m");
    println!("cargo:rerun-if-changed=native/virtual_display_shim.h");

    cc::Build::new()
        .file("native/virtual_display_shim.m")
        .include("native")
        .flag("-fobjc-arc")
        .compile("virtual_display_shim");

    println!("cargo:rustc-link-lib=framework=Foundation");
    println!("cargo:rustc-link-lib=framework=CoreGraphics");
}
