use std::env;
use std::path::PathBuf;

const LIBRARIES: &str = "libavformat, libavcodec and libavutil";

fn main() {
    for var in ["FFMPEG_DIR", "VCPKG_ROOT", "VCPKGRS_DYNAMIC", "VCPKGRS_TRIPLET"] {
        println!("cargo:rerun-if-env-changed={var}");
    }

    // The scripted engine used by the tests needs no native libraries.
    if env::var_os("CARGO_FEATURE_FFMPEG").is_none() {
        return;
    }

    let windows = env::var("CARGO_CFG_TARGET_OS").is_ok_and(|os| os == "windows");
    if !windows || env::var_os("FFMPEG_DIR").is_some() {
        return;
    }

    for hint in vcpkg_hints() {
        println!("cargo:warning=transpipe: {hint}");
    }
}

/// Explain where `FfmpegEngine` will look for FFmpeg 8 on a Windows host
/// without `FFMPEG_DIR`.
fn vcpkg_hints() -> Vec<String> {
    let Ok(root) = env::var("VCPKG_ROOT") else {
        return vec![format!(
            "`--features ffmpeg` links {LIBRARIES} (FFmpeg 8). Run `vcpkg install ffmpeg[x264]` \
             and point FFMPEG_DIR at the install, or set VCPKG_ROOT."
        )];
    };

    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let prefix = PathBuf::from(root).join("installed").join(&triplet);

    if !prefix.join("include").join("libavformat").is_dir() {
        return vec![format!(
            "no FFmpeg headers under {}; the {triplet} triplet needs `vcpkg install ffmpeg[x264]:{triplet}` \
             before transpipe-cli can transcode.",
            prefix.display()
        )];
    }

    let mut hints = vec![format!(
        "linking FfmpegEngine against {LIBRARIES} from {} (set FFMPEG_DIR to pin it).",
        prefix.display()
    )];
    if triplet.ends_with("windows") && env::var_os("VCPKGRS_DYNAMIC").is_none() {
        hints.push(
            "the dynamic vcpkg triplet ships DLLs; set VCPKGRS_DYNAMIC=1 so transpipe-cli.exe finds them at run time."
                .to_string(),
        );
    }
    hints
}
