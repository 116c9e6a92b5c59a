use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Directory names excluded from a digest, matching the walker's own
/// exclusion list (§4.3) minus the build-tooling-specific entries that
/// don't apply here: VCS metadata and the vendor tree itself never
/// contribute to a project's identity.
const EXCLUDED_DIRS: &[&str] = &["vendor", ".bzr", ".git", ".hg", ".svn"];

const TYPE_DIR: u32 = 1 << 0;
const TYPE_SYMLINK: u32 = 1 << 1;
const TYPE_NAMED_PIPE: u32 = 1 << 2;
const TYPE_SOCKET: u32 = 1 << 3;
const TYPE_DEVICE: u32 = 1 << 4;

/// A fixed-size, deterministic digest of a directory tree's contents
/// (§4.10). [`Digest::EMPTY`] is the reserved all-zero sentinel a lock
/// uses to record "no digest was computed for this project yet" — see
/// [`super::verify::DigestStatus::EmptyDigestInLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const EMPTY: Digest = Digest([0u8; 32]);

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("`{0}` is not a valid 32-byte hex digest")]
pub struct DigestParseError(String);

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Digest, DigestParseError> {
        let bytes = hex::decode(s).map_err(|_| DigestParseError(s.to_string()))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| DigestParseError(s.to_string()))?;
        Ok(Digest(arr))
    }
}

/// Compute the deterministic digest of everything under `dir` (§4.10).
///
/// BFS traversal in lexicographic order at each level. Devices, named
/// pipes, and sockets are skipped outright (never absorbed); directories
/// named in [`EXCLUDED_DIRS`] are not descended. Regular file contents are
/// passed through [`normalize_and_hash_file`] so CRLF/LF differences don't
/// change the result.
pub fn digest_from_directory(dir: &Path) -> io::Result<Digest> {
    let mut hasher = blake3::Hasher::new();
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    queue.push_back(PathBuf::new());

    while let Some(rel) = queue.pop_front() {
        let abs = dir.join(&rel);
        if rel.as_os_str().is_empty() {
            queue_children(dir, &abs, &rel, &mut queue)?;
            continue;
        }

        let meta = fs::symlink_metadata(&abs)?;
        absorb_node(&mut hasher, &rel, &abs, &meta)?;
        if meta.is_dir() {
            queue_children(dir, &abs, &rel, &mut queue)?;
        }
    }

    Ok(Digest(hasher.finalize().into()))
}

fn queue_children(root: &Path, abs_dir: &Path, rel_dir: &Path, queue: &mut VecDeque<PathBuf>) -> io::Result<()> {
    let _ = root;
    let mut children: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(abs_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;

        if file_type.is_dir() && EXCLUDED_DIRS.contains(&name.as_str()) {
            continue;
        }
        if is_skipped_kind(&file_type) {
            continue;
        }

        children.push((name.clone(), rel_dir.join(&name)));
    }
    children.sort_by(|a, b| a.0.cmp(&b.0));
    for (_, rel) in children {
        queue.push_back(rel);
    }
    Ok(())
}

#[cfg(unix)]
fn is_skipped_kind(ft: &fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    ft.is_fifo() || ft.is_socket() || ft.is_char_device() || ft.is_block_device()
}

#[cfg(not(unix))]
fn is_skipped_kind(_ft: &fs::FileType) -> bool {
    false
}

fn type_mask(meta: &fs::Metadata) -> u32 {
    let ft = meta.file_type();
    let mut mask = 0u32;
    if ft.is_dir() {
        mask |= TYPE_DIR;
    }
    if ft.is_symlink() {
        mask |= TYPE_SYMLINK;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if ft.is_fifo() {
            mask |= TYPE_NAMED_PIPE;
        }
        if ft.is_socket() {
            mask |= TYPE_SOCKET;
        }
        if ft.is_char_device() || ft.is_block_device() {
            mask |= TYPE_DEVICE;
        }
    }
    mask
}

fn slashed(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn absorb_node(hasher: &mut blake3::Hasher, rel: &Path, abs: &Path, meta: &fs::Metadata) -> io::Result<()> {
    hasher.update(slashed(rel).as_bytes());
    hasher.update(&[0]);
    hasher.update(&type_mask(meta).to_le_bytes());
    hasher.update(&[0]);

    if meta.file_type().is_symlink() {
        let target = fs::read_link(abs)?;
        hasher.update(slashed(&target).as_bytes());
    } else if meta.is_file() {
        let count = hash_file_contents(abs, hasher)?;
        hasher.update(count.to_string().as_bytes());
        hasher.update(&[0]);
    }

    Ok(())
}

/// Feed `path`'s contents into `hasher` after CRLF-normalizing them
/// (every `\r\n` becomes `\n`), correctly carrying a lone `\r` across a
/// buffer boundary so the normalization doesn't depend on how the reader
/// happened to chunk the file. Returns the normalized byte count.
fn hash_file_contents(path: &Path, hasher: &mut blake3::Hasher) -> io::Result<u64> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; 64 * 1024];
    let mut out = Vec::with_capacity(buf.len());
    let mut carry_cr = false;
    let mut count: u64 = 0;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.clear();
        carry_cr = normalize_crlf_chunk(&buf[..n], carry_cr, &mut out);
        hasher.update(&out);
        count += out.len() as u64;
    }

    if carry_cr {
        hasher.update(b"\r");
        count += 1;
    }
    Ok(count)
}

/// Append `chunk` to `out` with every `\r\n` collapsed to `\n`, honoring a
/// `\r` carried over from the end of the previous chunk. Returns whether
/// this chunk itself ended mid-sequence on an unresolved `\r`.
fn normalize_crlf_chunk(chunk: &[u8], carry_cr: bool, out: &mut Vec<u8>) -> bool {
    let mut i = 0;
    if carry_cr {
        if chunk.first() == Some(&b'\n') {
            out.push(b'\n');
            i = 1;
        } else {
            out.push(b'\r');
        }
    }

    while i < chunk.len() {
        match chunk[i] {
            b'\r' if chunk.get(i + 1) == Some(&b'\n') => {
                out.push(b'\n');
                i += 2;
            }
            b'\r' if i + 1 == chunk.len() => {
                return true;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &[u8]) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn crlf_normalization_is_invariant_to_line_endings() {
        let crlf = tempfile::tempdir().unwrap();
        write(crlf.path(), "pkg/main.src", b"hello\r\nworld\n");
        let lf = tempfile::tempdir().unwrap();
        write(lf.path(), "pkg/main.src", b"hello\nworld\n");

        assert_eq!(
            digest_from_directory(crlf.path()).unwrap(),
            digest_from_directory(lf.path()).unwrap()
        );
    }

    #[test]
    fn excluded_directory_presence_does_not_change_digest() {
        let plain = tempfile::tempdir().unwrap();
        write(plain.path(), "main.src", b"package app\n");

        let with_git = tempfile::tempdir().unwrap();
        write(with_git.path(), "main.src", b"package app\n");
        write(with_git.path(), ".git/HEAD", b"ref: refs/heads/main\n");
        write(with_git.path(), "vendor/other/lib.src", b"package lib\n");

        assert_eq!(
            digest_from_directory(plain.path()).unwrap(),
            digest_from_directory(with_git.path()).unwrap()
        );
    }

    #[test]
    fn digest_differs_on_content_change() {
        let a = tempfile::tempdir().unwrap();
        write(a.path(), "main.src", b"package app\n");
        let b = tempfile::tempdir().unwrap();
        write(b.path(), "main.src", b"package app2\n");
        assert_ne!(digest_from_directory(a.path()).unwrap(), digest_from_directory(b.path()).unwrap());
    }

    #[test]
    fn lone_carriage_return_is_preserved() {
        let mut out = Vec::new();
        let carry = normalize_crlf_chunk(b"a\rb", false, &mut out);
        assert!(!carry);
        assert_eq!(out, b"a\rb");
    }

    #[test]
    fn carriage_return_split_across_chunks_is_collapsed() {
        let mut out = Vec::new();
        let carry = normalize_crlf_chunk(b"hello\r", false, &mut out);
        assert!(carry);
        assert_eq!(out, b"hello");

        out.clear();
        let carry = normalize_crlf_chunk(b"\nworld", true, &mut out);
        assert!(!carry);
        assert_eq!(out, b"\nworld");
    }

    #[test]
    fn digest_hex_round_trips() {
        let d = Digest([7u8; 32]);
        let hex = d.to_hex();
        assert_eq!(hex.parse::<Digest>().unwrap(), d);
    }

    #[test]
    fn empty_sentinel_parses_from_all_zero_hex() {
        let zero_hex = "0".repeat(64);
        assert_eq!(zero_hex.parse::<Digest>().unwrap(), Digest::EMPTY);
        assert!(Digest::EMPTY.is_empty());
    }
}
