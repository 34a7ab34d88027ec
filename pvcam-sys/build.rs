use std::env;
use std::path::PathBuf;

fn main() {
    let out_path = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    // Bindgen and linking only run with `pvcam-sdk`, so the crate still builds on
    // machines without the SDK installed.
    #[cfg(feature = "pvcam-sdk")]
    {
        println!("cargo:rerun-if-env-changed=PVCAM_SDK_DIR");
        println!("cargo:rerun-if-env-changed=PVCAM_LIB_DIR");
        println!("cargo:rerun-if-changed=wrapper.h");

        let sdk_dir = env::var("PVCAM_SDK_DIR").expect(
            "PVCAM_SDK_DIR environment variable must be set when `pvcam-sdk` feature is enabled.",
        );
        let sdk_include_path = PathBuf::from(&sdk_dir).join("include");
        let sdk_lib_path = env::var("PVCAM_LIB_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(&sdk_dir).join("lib"));

        if !sdk_include_path.exists() {
            panic!(
                "PVCAM SDK include path does not exist: {:?}",
                sdk_include_path
            );
        }
        // Libraries are sometimes installed system-wide (e.g. /opt/pvcam/library).
        if !sdk_lib_path.exists() {
            println!(
                "cargo:warning=PVCAM SDK lib path does not exist: {}",
                sdk_lib_path.display()
            );
        }

        let bindings = bindgen::Builder::default()
            .header("wrapper.h")
            .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
            .clang_arg(format!("-I{}", sdk_include_path.display()))
            .allowlist_function("pl_.*")
            .allowlist_type("rs_bool|uns8|uns16|uns32|uns64|int8|int16|int32|int64|flt64")
            .allowlist_type("rgn_type")
            .allowlist_type("FRAME_INFO|PFRAME_INFO|PVCAM_FRAME_INFO_GUID")
            // Enum members (CIRC_OVERWRITE, CCS_HALT, PL_CALLBACK_EOF, EXT_TRIG_INTERNAL, ...)
            // are emitted as bare constants so callers can pass them straight to pl_* calls.
            .default_enum_style(bindgen::EnumVariation::Consts)
            .prepend_enum_name(false)
            .allowlist_type("PL_CIRC_MODES|PL_CCS_ABORT_MODES|PL_CALLBACK_TYPE")
            .allowlist_type("PL_EXPOSURE_MODES|PL_EXPOSE_OUT_MODES|PL_IMAGE_STATUSES")
            .allowlist_var("PARAM_.*")
            .allowlist_var("ATTR_.*")
            .allowlist_var("TYPE_.*")
            .generate()
            .expect("Unable to generate PVCAM bindings");

        bindings
            .write_to_file(out_path.join("bindings.rs"))
            .expect("Couldn't write PVCAM bindings");

        println!("cargo:rustc-link-search=native={}", sdk_lib_path.display());
        #[cfg(target_os = "windows")]
        println!("cargo:rustc-link-lib=pvcam64");
        #[cfg(not(target_os = "windows"))]
        println!("cargo:rustc-link-lib=pvcam");
    }

    #[cfg(not(feature = "pvcam-sdk"))]
    {
        std::fs::write(
            out_path.join("bindings.rs"),
            "// PVCAM bindings are only generated with the `pvcam-sdk` feature.\n",
        )
        .expect("Couldn't write placeholder bindings");
    }
}
