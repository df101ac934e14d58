//! Release metadata
//!
//! All version-derived strings come from one place so the release, the
//! compatibility line, the revision label, and the package branch can never
//! drift apart.

/// Major version of the target release
pub const MAJOR: u32 = 1;
/// Minor version of the target release
pub const MINOR: u32 = 7;
/// Point release
pub const POINT: u32 = 3;
/// Distribution revision
pub const REV: u32 = 6;

/// Marker present in version strings reported by an already-managed control plane
pub const MANAGED_MARKER: &str = "asm-managed";

/// Public bucket holding released installer tarballs
pub const RELEASE_BUCKET_URL: &str = "https://storage.googleapis.com/gke-release/asm";

/// Public repository holding the versioned configuration package
pub const PACKAGE_REPO: &str =
    "https://github.com/GoogleCloudPlatform/anthos-service-mesh-packages.git/asm";

/// Directory name the configuration package is fetched into
pub const PACKAGE_DIR: &str = "asm";

/// Strings derived from the target version numbers, read-only after construction
#[derive(Debug, Clone)]
pub struct ReleaseDescriptor {
    /// Full release string, e.g. "1.7.3-asm.6"
    pub release: String,
    /// Major.minor prefix used for migration compatibility, e.g. "1.7."
    pub release_line: String,
    /// Control-plane revision label, e.g. "asm-173-6"
    pub revision_label: String,
    /// Cluster label value (label-safe, no dots), e.g. "1-7-3-asm-6"
    pub label_value: String,
    /// Branch the configuration package is fetched from, e.g. "release-1.7-asm"
    pub branch: String,
}

impl ReleaseDescriptor {
    /// Descriptor for the compiled-in target release
    pub fn current() -> Self {
        Self::from_parts(MAJOR, MINOR, POINT, REV)
    }

    pub(crate) fn from_parts(major: u32, minor: u32, point: u32, rev: u32) -> Self {
        Self {
            release: format!("{}.{}.{}-asm.{}", major, minor, point, rev),
            release_line: format!("{}.{}.", major, minor),
            revision_label: format!("asm-{}{}{}-{}", major, minor, point, rev),
            label_value: format!("{}-{}-{}-asm-{}", major, minor, point, rev),
            branch: format!("release-{}.{}-asm", major, minor),
        }
    }

    /// Name of the installer directory inside the workspace, e.g. "istio-1.7.3-asm.6"
    pub fn install_dir(&self) -> String {
        format!("istio-{}", self.release)
    }

    /// Platform-specific tarball name for the given OS ("linux" or "macos")
    pub fn tarball_name(&self, os: &str) -> String {
        let platform = if os.eq_ignore_ascii_case("macos") || os.eq_ignore_ascii_case("darwin") {
            "osx"
        } else {
            "linux-amd64"
        };
        format!("istio-{}-{}.tar.gz", self.release, platform)
    }
}
