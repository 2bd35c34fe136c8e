fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Host builds need no ESP-IDF environment; only the target build links
    // against the IDF sysroot.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
