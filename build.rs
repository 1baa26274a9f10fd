fn main() {
    println!("cargo:rerun-if-changed=wrapper.h");
    println!("cargo:rerun-if-env-changed=CAEN_DIGITIZER_DIR");

    #[cfg(feature = "caen-sdk")]
    generate_bindings();
}

#[cfg(feature = "caen-sdk")]
fn generate_bindings() {
    use std::env;
    use std::path::PathBuf;

    let mut builder = bindgen::Builder::default()
        .header("wrapper.h")
        .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
        .allowlist_function("CAEN_DGTZ_.*")
        .allowlist_type("CAEN_DGTZ_.*")
        .allowlist_var("CAEN_DGTZ_.*|MAX_UINT16_CHANNEL_SIZE");

    if let Ok(dir) = env::var("CAEN_DIGITIZER_DIR") {
        let root = PathBuf::from(dir);
        builder = builder.clang_arg(format!("-I{}", root.join("include").display()));
        println!(
            "cargo:rustc-link-search=native={}",
            root.join("lib").display()
        );
    }

    let bindings = builder
        .generate()
        .expect("unable to generate CAENDigitizer bindings");

    let out_path = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    bindings
        .write_to_file(out_path.join("bindings.rs"))
        .expect("couldn't write bindings");

    println!("cargo:rustc-link-lib=CAENDigitizer");
}
