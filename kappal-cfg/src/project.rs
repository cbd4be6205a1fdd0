//  PROJECT.rs
//
//  Description:
//!   Derives the stable project identity from the compose directory, and
//!   provides the DNS-1123 sanitizer used for every generated resource
//!   name.
//

use std::path::{Path, PathBuf};

use log::debug;
use path_clean::PathClean as _;
use sha2::{Digest, Sha256};


/***** CONSTANTS *****/
/// The maximum length of the directory-derived part of the identity.
///
/// 54 characters plus the hyphen and the 8-character hash suffix stay within
/// the 63-character DNS-1123 label limit.
const MAX_LABEL_LEN: usize = 54;

/// The label used when the directory name sanitizes away to nothing.
const FALLBACK_LABEL: &str = "default";





/***** HELPER FUNCTIONS *****/
/// Makes the given path absolute against the current working directory, without touching the filesystem.
///
/// # Arguments
/// - `path`: The path to make absolute.
///
/// # Returns
/// The cleaned, absolute version of the path.
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf().clean()
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")).join(path).clean()
    }
}





/***** LIBRARY *****/
/// Reduces the given name to a valid DNS-1123 label.
///
/// Underscores become hyphens, uppercase becomes lowercase, anything outside
/// `[a-z0-9-.]` is stripped, and leading/trailing hyphens and dots are
/// trimmed. The function is idempotent.
///
/// # Arguments
/// - `name`: The name to sanitize.
///
/// # Returns
/// The sanitized name. May be empty if nothing conformant remains.
pub fn sanitize(name: impl AsRef<str>) -> String {
    let name: &str = name.as_ref();

    let mut res: String = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '_' => res.push('-'),
            'a'..='z' | '0'..='9' | '-' | '.' => res.push(c),
            'A'..='Z' => res.push(c.to_ascii_lowercase()),
            _ => {},
        }
    }

    // Trim the edges of anything DNS-1123 disallows there
    res.trim_matches(|c| c == '-' || c == '.').to_string()
}

/// Returns the first 8 hexadecimal characters of the SHA-256 digest of the given input.
///
/// # Arguments
/// - `input`: The bytes to digest.
///
/// # Returns
/// An 8-character, lowercase hexadecimal string.
pub fn short_digest(input: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(input.as_ref());
    digest.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}

/// Resolves the identity of the project in the given compose directory.
///
/// If the user supplied an explicit name, that name is returned unchanged.
/// Otherwise, the identity is `<label>-<hex8>`, where `<label>` is the
/// sanitized basename of the directory and `<hex8>` is derived from the
/// directory's canonical absolute path, so that the same physical directory
/// always maps to the same identity - also when reached through a symlink.
///
/// When kappal itself runs inside a container, the caller passes the
/// host-side view of the directory as `host_hint`; the hash then covers both
/// views so that distinct host directories mounted at the same container path
/// do not collide.
///
/// # Arguments
/// - `user_name`: An explicit project name, if the user gave one.
/// - `compose_dir`: The directory containing the compose file.
/// - `host_hint`: The host-side path of `compose_dir`, if kappal runs in a container.
///
/// # Returns
/// The project identity. The fallback chain guarantees this function always
/// produces a valid DNS-1123 label.
pub fn resolve(user_name: Option<&str>, compose_dir: impl AsRef<Path>, host_hint: Option<&str>) -> String {
    let compose_dir: &Path = compose_dir.as_ref();

    // An explicit name always wins
    if let Some(name) = user_name {
        debug!("Using explicit project name '{}'", name);
        return name.into();
    }

    // Compute the hash input: the host view takes precedence, since the
    // container-side path says nothing unique about the directory.
    let hash_input: String = match host_hint {
        Some(hint) => format!("{}:{}", hint, absolutize(compose_dir).display()),
        None       => match std::fs::canonicalize(compose_dir) {
            Ok(real) => real.display().to_string(),
            Err(_)   => absolutize(compose_dir).display().to_string(),
        },
    };

    // Reduce the basename to a DNS label, with fallbacks for degenerate cases
    let base: String = compose_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let mut label: String = sanitize(&base).replace('.', "");
    label.truncate(MAX_LABEL_LEN);
    let label: &str = label.trim_matches('-');
    let label: &str = if label.is_empty() { FALLBACK_LABEL } else { label };

    let identity: String = format!("{}-{}", label, short_digest(hash_input.as_bytes()));
    debug!("Resolved project identity '{}' (hash input '{}')", identity, hash_input);
    identity
}



#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    /// Two invocations on the same directory must agree; different directories must not.
    #[test]
    fn identity_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = resolve(None, dir.path(), None);
        let b = resolve(None, dir.path(), None);
        assert_eq!(a, b);

        let other = tempfile::tempdir().unwrap();
        assert_ne!(resolve(None, other.path(), None), a);
    }

    /// The identity must match `^[a-z0-9][a-z0-9-]*-[0-9a-f]{8}$`.
    #[test]
    fn identity_shape() {
        let dir = tempfile::tempdir().unwrap();
        let id = resolve(None, dir.path(), None);

        let (label, hash) = id.rsplit_once('-').unwrap();
        assert!(!label.is_empty());
        assert!(label.chars().next().unwrap().is_ascii_alphanumeric());
        assert!(label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    /// A symlink to a directory must resolve to the directory's own identity.
    #[cfg(unix)]
    #[test]
    fn identity_symlink_invariant() {
        let real = tempfile::tempdir().unwrap();
        let holder = tempfile::tempdir().unwrap();
        let link = holder.path().join("link");
        std::os::unix::fs::symlink(real.path(), &link).unwrap();

        assert_eq!(resolve(None, &link, None), resolve(None, real.path(), None));
    }

    /// Distinct host hints must separate identities; the same hint must not.
    #[test]
    fn identity_host_hint_separation() {
        let dir = PathBuf::from("/workspace/app");
        let a = resolve(None, &dir, Some("/home/alice/app"));
        let b = resolve(None, &dir, Some("/home/bob/app"));
        assert_ne!(a, b);

        let c = resolve(None, "/workspace/app", Some("/home/alice/app"));
        assert_eq!(a, c);

        let d = resolve(None, "/workspace/other", Some("/home/alice/app"));
        assert_ne!(a, d);
    }

    /// An explicit user name passes through untouched.
    #[test]
    fn identity_explicit_name() {
        assert_eq!(resolve(Some("myproj"), "/whatever", None), "myproj");
    }

    /// Directory names that sanitize away entirely fall back to 'default'.
    #[test]
    fn identity_fallback_label() {
        let id = resolve(None, "/tmp/___", None);
        assert!(id.starts_with("default-"), "got '{}'", id);
    }

    #[test]
    fn sanitize_rules() {
        assert_eq!(sanitize("My_App"), "my-app");
        assert_eq!(sanitize("--web--"), "web");
        assert_eq!(sanitize(".hidden."), "hidden");
        assert_eq!(sanitize("a b c"), "abc");
        assert_eq!(sanitize("data_dir_1"), "data-dir-1");
        assert_eq!(sanitize("***"), "");
    }

    /// `sanitize` must be idempotent.
    #[test]
    fn sanitize_idempotent() {
        for raw in ["My_App", "--web--", "data_dir_1", "a.b.c", "UPPER"] {
            let once = sanitize(raw);
            assert_eq!(sanitize(&once), once);
        }
    }

    #[test]
    fn short_digest_shape() {
        let d = short_digest("kappal");
        assert_eq!(d.len(), 8);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(d, short_digest("kappal"));
        assert_ne!(d, short_digest("kappa1"));
    }
}
