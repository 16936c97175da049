/// Build flow:
///
/// 1. Without the `ibverbs` feature, nothing is linked; only the software
///    fabric provider is available.
/// 2. With it, try to locate `libibverbs` through `pkg-config` (rdma-core and
///    MLNX_OFED v5.x register it there).
/// 3. If that fails, fall back to a manually specified or default library
///    directory, as MLNX_OFED v4.9-x LTS installations require.
/// 4. Generate bindings for `src/bindings/verbs.h`.
fn main() {
    // Refuse to compile on non-64-bit platforms.
    if cfg!(not(target_pointer_width = "64")) {
        panic!("`rdmapair` currently only supports 64-bit platforms");
    }

    #[cfg(feature = "ibverbs")]
    verbs::link_and_generate();
}

#[cfg(feature = "ibverbs")]
mod verbs {
    use std::env::{self, consts};
    use std::path::{Path, PathBuf};

    /// Search for `libibverbs` via `pkg-config`. Return the include paths.
    fn probe_pkg_config() -> Result<Vec<String>, ()> {
        let lib = pkg_config::Config::new()
            .atleast_version("1.8.28")
            .statik(false)
            .probe("libibverbs")
            .map_err(|_| ())?;

        Ok(lib
            .include_paths
            .iter()
            .filter_map(|p| p.to_str().map(ToOwned::to_owned))
            .collect())
    }

    /// Search for `libibverbs` in a fixed directory.
    ///
    /// We assume the default installation path as `/usr`, so by default the
    /// include path needs no extra flags.
    fn probe_lib_dir() -> Result<Vec<String>, ()> {
        let lib_dir = env::var("IBVERBS_LIB_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Path::new("/usr/lib").to_owned());

        let dylib_name = format!("{}ibverbs{}", consts::DLL_PREFIX, consts::DLL_SUFFIX);
        if !lib_dir.join(dylib_name).exists() && !lib_dir.join("libibverbs.a").exists() {
            return Err(());
        }

        println!("cargo:rustc-link-search=native={}", lib_dir.display());
        println!("cargo:rustc-link-lib=ibverbs");
        Ok(env::var("IBVERBS_INCLUDE_DIR")
            .map(|dir| vec![dir])
            .unwrap_or_default())
    }

    pub(super) fn link_and_generate() {
        println!("cargo:rerun-if-changed=src/bindings/verbs.h");
        println!("cargo:rerun-if-env-changed=IBVERBS_LIB_DIR");
        println!("cargo:rerun-if-env-changed=IBVERBS_INCLUDE_DIR");

        let include_dirs = probe_pkg_config()
            .or_else(|_| probe_lib_dir())
            .expect("cannot find libibverbs; install rdma-core or set IBVERBS_LIB_DIR");
        gen_verb_bindings(include_dirs);
    }

    fn gen_verb_bindings(include_dirs: Vec<String>) {
        let include_args = include_dirs.iter().map(|p| format!("-I{}", p));
        let bindings = bindgen::builder()
            .clang_args(include_args)
            .header("src/bindings/verbs.h")
            .allowlist_function("ibv_.*")
            .allowlist_type("ibv_.*")
            .allowlist_type("verbs_.*")
            .opaque_type("pthread_.*")
            .blocklist_type("in6_addr")
            .blocklist_type("sockaddr.*")
            .blocklist_type("timespec")
            .blocklist_type("ibv_ah_attr")
            .blocklist_type("ibv_gid")
            .blocklist_type("ibv_global_route")
            .blocklist_type("ibv_send_wr")
            .blocklist_type("ibv_wc")
            .bitfield_enum("ibv_access_flags")
            .bitfield_enum("ibv_qp_attr_mask")
            .bitfield_enum("ibv_send_flags")
            .bitfield_enum("ibv_wc_flags")
            .bitfield_enum("ibv_port_cap_flags")
            .bitfield_enum("ibv_device_cap_flags")
            .constified_enum_module("ibv_node_type")
            .constified_enum_module("ibv_transport_type")
            .constified_enum_module("ibv_mtu")
            .constified_enum_module("ibv_port_state")
            .constified_enum_module("ibv_wc_status")
            .constified_enum_module("ibv_wc_opcode")
            .constified_enum_module("ibv_qp_type")
            .constified_enum_module("ibv_qp_state")
            .constified_enum_module("ibv_mig_state")
            .constified_enum_module("ibv_wr_opcode")
            .derive_copy(true)
            .derive_debug(false)
            .derive_default(true)
            .generate_comments(true)
            .layout_tests(false)
            .prepend_enum_name(false)
            .size_t_is_usize(true)
            .disable_untagged_union()
            .rustified_enum("ibv_event_type")
            .generate()
            .expect("failed to generate bindings");

        let out_dir = env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo");
        let dest = Path::new(&out_dir).join("verbs_bindings.rs");
        bindings
            .write_to_file(dest)
            .expect("failed to write bindings");
    }
}
