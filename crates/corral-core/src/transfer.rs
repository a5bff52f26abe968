//! Tar stream transfer into and out of a sandbox root.
//!
//! The `tar` crate is synchronous, so both directions run on the blocking
//! pool behind a [`SyncIoBridge`]. Entry names are normalized here rather
//! than left to `Entry::unpack_in`, which silently skips traversal attempts
//! where callers need an error.

use crate::error::TransferError;
use corral_driver::path::{self, PathStyle};
use std::fs;
use std::future::Future;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tar::{Archive, Builder, EntryType};
use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tokio_util::io::SyncIoBridge;
use uuid::Uuid;

/// Buffer between the archive producer and the consumer of a [`TarStream`].
const STREAM_BUFFER: usize = 64 * 1024;

/// Unpack a tar stream under `target` inside the sandbox root.
///
/// The whole input is consumed even when an entry fails, so the sender
/// never blocks on an unread stream. Entries written before a failure are
/// left in place. Returns the number of entries materialized.
pub async fn stream_in<R>(root: &Path, target: &str, mut reader: R) -> Result<usize, TransferError>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let dest = match path::resolve_in_root(root, target) {
        Ok(dest) => dest,
        Err(_) => {
            drain(&mut reader).await;
            return Err(TransferError::PathEscape(target.to_string()));
        }
    };

    let sandbox_root = root.to_path_buf();
    let bridge = SyncIoBridge::new(reader);
    let count = tokio::task::spawn_blocking(move || unpack(bridge, &sandbox_root, &dest))
        .await
        .map_err(|e| TransferError::Task(e.to_string()))??;

    tracing::debug!(target_path = %target, entries = count, "Archive unpacked");
    Ok(count)
}

/// Open a lazy tar stream of `source` inside the sandbox root.
///
/// A directory is archived relative to its contents; a file becomes a
/// single entry named after it. Symlinks are archived as links.
pub async fn stream_out(root: &Path, source: &str) -> Result<TarStream, TransferError> {
    let src = path::resolve_in_root(root, source)
        .map_err(|_| TransferError::PathEscape(source.to_string()))?;
    let src = {
        let (root, source) = (root.to_path_buf(), source.to_string());
        tokio::task::spawn_blocking(move || confine_source(&root, &src, &source))
            .await
            .map_err(|e| TransferError::Task(e.to_string()))??
    };

    let meta = match tokio::fs::symlink_metadata(&src).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(TransferError::NotFound(source.to_string()))
        }
        Err(e) => return Err(TransferError::Read { path: src, source: e }),
    };

    let (reader, writer) = tokio::io::duplex(STREAM_BUFFER);
    let bridge = SyncIoBridge::new(writer);
    let is_dir = meta.is_dir();
    let producer = tokio::task::spawn_blocking(move || pack(bridge, &src, is_dir));

    Ok(TarStream {
        reader,
        producer: Some(producer),
        outcome: None,
    })
}

/// Resolve symlinks in the parent directories of `src` and check that the
/// result stays inside the sandbox root. The final component is left as is,
/// so a symlink source is archived as a link.
fn confine_source(root: &Path, src: &Path, name: &str) -> Result<PathBuf, TransferError> {
    let canonical = |path: &Path| match path.canonicalize() {
        Ok(resolved) => Ok(resolved),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(TransferError::NotFound(name.to_string()))
        }
        Err(source) => Err(TransferError::Read {
            path: path.to_path_buf(),
            source,
        }),
    };

    let sandbox = canonical(root)?;
    let resolved = match (src.parent(), src.file_name()) {
        (Some(parent), Some(file_name)) if src != root => canonical(parent)?.join(file_name),
        _ => sandbox.clone(),
    };
    if !resolved.starts_with(&sandbox) {
        return Err(TransferError::PathEscape(name.to_string()));
    }
    Ok(resolved)
}

/// Read-once tar byte stream produced on demand.
///
/// End of stream is only reported once the producer has finished cleanly.
/// If archiving fails partway, the read that reaches the end of the
/// produced bytes returns the error instead, so a truncated archive is
/// never mistaken for a complete one.
pub struct TarStream {
    reader: DuplexStream,
    producer: Option<JoinHandle<Result<u64, TransferError>>>,
    outcome: Option<Result<u64, TransferError>>,
}

impl TarStream {
    /// Wait for the producer and return the number of entries written.
    ///
    /// Dropping unread data first makes the producer fail.
    pub async fn finish(self) -> Result<u64, TransferError> {
        let TarStream {
            reader,
            producer,
            outcome,
        } = self;
        drop(reader);
        if let Some(outcome) = outcome {
            return outcome;
        }
        match producer {
            Some(task) => task
                .await
                .map_err(|e| TransferError::Task(e.to_string()))?,
            None => Ok(0),
        }
    }

    /// Collect the whole archive into memory.
    pub async fn into_bytes(mut self) -> Result<Vec<u8>, TransferError> {
        let mut bytes = Vec::new();
        let read = self.read_to_end(&mut bytes).await;
        let finished = self.finish().await;
        match (read, finished) {
            (_, Err(e)) => Err(e),
            (Err(e), Ok(_)) => Err(TransferError::Task(e.to_string())),
            (Ok(_), Ok(_)) => Ok(bytes),
        }
    }

    /// Poll the producer once the pipe is drained.
    fn poll_outcome(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.outcome.is_none() {
            let Some(producer) = self.producer.as_mut() else {
                return Poll::Ready(Ok(()));
            };
            let joined = match Pin::new(producer).poll(cx) {
                Poll::Ready(joined) => joined,
                Poll::Pending => return Poll::Pending,
            };
            self.producer = None;
            self.outcome =
                Some(joined.unwrap_or_else(|e| Err(TransferError::Task(e.to_string()))));
        }

        match &self.outcome {
            Some(Err(e)) => Poll::Ready(Err(io::Error::other(e.to_string()))),
            _ => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncRead for TarStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.reader).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before && buf.remaining() > 0 => {
                this.poll_outcome(cx)
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for TarStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarStream")
            .field("producing", &self.producer.is_some())
            .field("failed", &matches!(self.outcome, Some(Err(_))))
            .finish()
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: &mut R) {
    let _ = tokio::io::copy(reader, &mut tokio::io::sink()).await;
}

fn unpack<R: Read>(reader: R, sandbox_root: &Path, dest: &Path) -> Result<usize, TransferError> {
    let mut archive = Archive::new(reader);
    archive.set_overwrite(true);

    let result = prepare_dest(sandbox_root, dest)
        .and_then(|root| unpack_entries(&mut archive, dest, &root));

    // trailing padding and anything after a failed entry
    let mut rest = archive.into_inner();
    let _ = io::copy(&mut rest, &mut io::sink());

    result
}

/// Create the destination and return its canonical form, refusing a
/// destination that a symlink redirects out of the sandbox.
fn prepare_dest(sandbox_root: &Path, dest: &Path) -> Result<PathBuf, TransferError> {
    let write_error = |source| TransferError::Write {
        path: dest.to_path_buf(),
        source,
    };
    fs::create_dir_all(dest).map_err(write_error)?;
    let sandbox = sandbox_root.canonicalize().map_err(write_error)?;
    let resolved = dest.canonicalize().map_err(write_error)?;
    if !resolved.starts_with(&sandbox) {
        return Err(TransferError::PathEscape(dest.display().to_string()));
    }
    Ok(resolved)
}

fn unpack_entries<R: Read>(
    archive: &mut Archive<R>,
    dest: &Path,
    root: &Path,
) -> Result<usize, TransferError> {
    let mut count = 0;

    for entry in archive.entries().map_err(TransferError::Malformed)? {
        let mut entry = entry.map_err(TransferError::Malformed)?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let relative = entry_path(&name)?;
        let kind = entry.header().entry_type();

        if relative.as_os_str().is_empty() {
            // the archive root itself
            continue;
        }

        let target = dest.join(&relative);
        let parent = target.parent().unwrap_or(dest).to_path_buf();
        create_within(&parent, root, &name)?;

        match kind {
            EntryType::Directory => {
                create_within(&target, root, &name)?;
                entry.unpack(&target).map_err(|source| TransferError::Write {
                    path: target.clone(),
                    source,
                })?;
            }
            EntryType::Regular | EntryType::Continuous | EntryType::Symlink => {
                write_atomically(&mut entry, &parent, &target)?;
            }
            EntryType::Link => {
                let link = entry
                    .link_name_bytes()
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
                    .ok_or_else(|| TransferError::Unsupported {
                        path: name.clone(),
                        kind: "hard link without target".into(),
                    })?;
                let original = dest.join(entry_path(&link)?);
                ensure_within(&original, root, &link)?;
                let _ = fs::remove_file(&target);
                fs::hard_link(&original, &target).map_err(|source| TransferError::Write {
                    path: target.clone(),
                    source,
                })?;
            }
            EntryType::XGlobalHeader | EntryType::XHeader => continue,
            other => {
                return Err(TransferError::Unsupported {
                    path: name,
                    kind: format!("{other:?}"),
                })
            }
        }

        tracing::trace!(entry = %name, "Unpacked entry");
        count += 1;
    }

    Ok(count)
}

/// Normalize an entry name to a path relative to the destination.
fn entry_path(name: &str) -> Result<PathBuf, TransferError> {
    let translated = path::translate(name, PathStyle::Unix);
    path::normalize_relative(Path::new(&translated))
        .ok_or_else(|| TransferError::PathEscape(name.to_string()))
}

/// Reject paths whose resolved location (following symlinks already in the
/// tree) is outside `root`.
fn ensure_within(path: &Path, root: &Path, name: &str) -> Result<(), TransferError> {
    let resolved = path.canonicalize().map_err(|source| TransferError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    if resolved.starts_with(root) {
        Ok(())
    } else {
        Err(TransferError::PathEscape(name.to_string()))
    }
}

/// Create `dir` after checking that its deepest existing ancestor resolves
/// inside `root`. Directories created below that point cannot escape.
fn create_within(dir: &Path, root: &Path, name: &str) -> Result<(), TransferError> {
    let mut existing = dir;
    while !existing.exists() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => break,
        }
    }
    ensure_within(existing, root, name)?;
    fs::create_dir_all(dir).map_err(|source| TransferError::Write {
        path: dir.to_path_buf(),
        source,
    })
}

/// Write an entry next to its target, then rename over it, so a partially
/// written file is never visible under its final name.
fn write_atomically<R: Read>(
    entry: &mut tar::Entry<'_, R>,
    parent: &Path,
    target: &Path,
) -> Result<(), TransferError> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = staging_path(parent, &file_name);

    let written = entry
        .unpack(&staging)
        .and_then(|_| fs::rename(&staging, target));
    if let Err(source) = written {
        let _ = fs::remove_file(&staging);
        return Err(TransferError::Write {
            path: target.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Unique per call, so concurrent transfers into one directory never share
/// a staging file.
fn staging_path(parent: &Path, file_name: &str) -> PathBuf {
    parent.join(format!(
        ".{file_name}.{}.corral-partial",
        Uuid::new_v4().simple()
    ))
}

/// Writer handed to the tar builder. Once abandoned every write fails, so
/// the builder cannot append an end-of-archive trailer to a failed archive
/// when it is dropped.
struct ArchiveSink<W> {
    inner: W,
    abandoned: bool,
}

impl<W: Write> Write for ArchiveSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.abandoned {
            return Err(io::Error::other("archive abandoned"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.abandoned {
            return Err(io::Error::other("archive abandoned"));
        }
        self.inner.flush()
    }
}

fn pack<W: Write>(writer: W, src: &Path, is_dir: bool) -> Result<u64, TransferError> {
    let read_error = |source| TransferError::Read {
        path: src.to_path_buf(),
        source,
    };

    let mut builder = Builder::new(ArchiveSink {
        inner: writer,
        abandoned: false,
    });
    builder.follow_symlinks(false);

    let appended = if is_dir {
        builder
            .append_dir_all("", src)
            .map(|_| count_entries(src))
    } else {
        let name = src.file_name().map(PathBuf::from).unwrap_or_default();
        builder.append_path_with_name(src, &name).map(|_| 1)
    };
    let count = match appended {
        Ok(count) => count,
        Err(source) => {
            builder.get_mut().abandoned = true;
            tracing::warn!(source_path = %src.display(), error = %source, "Archive abandoned");
            return Err(read_error(source));
        }
    };

    let mut sink = builder.into_inner().map_err(read_error)?;
    sink.flush().map_err(read_error)?;
    Ok(count)
}

fn count_entries(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(kind) if kind.is_dir() => 1 + count_entries(&entry.path()),
            _ => 1,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "corral-transfer-test-{}-{}",
            std::process::id(),
            id
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(EntryType::Regular);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    /// One entry whose name bypasses `set_path` validation, without the
    /// end-of-archive marker.
    fn raw_entry(name: &str, data: &[u8]) -> Vec<u8> {
        let mut header = tar::Header::new_old();
        header.as_old_mut().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        header.set_cksum();

        let mut bytes = header.as_bytes().to_vec();
        bytes.extend_from_slice(data);
        bytes.resize(bytes.len().next_multiple_of(512), 0);
        bytes
    }

    fn raw_archive(name: &str, data: &[u8]) -> Vec<u8> {
        let mut bytes = raw_entry(name, data);
        bytes.extend_from_slice(&[0u8; 1024]);
        bytes
    }

    /// Reader that records how many bytes it has handed out.
    struct CountingReader {
        inner: std::io::Cursor<Vec<u8>>,
        served: Arc<AtomicUsize>,
    }

    impl AsyncRead for CountingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            let before = buf.filled().len();
            let polled = Pin::new(&mut this.inner).poll_read(cx, buf);
            this.served
                .fetch_add(buf.filled().len() - before, Ordering::SeqCst);
            polled
        }
    }

    #[tokio::test]
    async fn test_stream_in_writes_files() {
        let root = temp_dir();
        let tar = archive(&[("a.txt", b"alpha"), ("dir/b.txt", b"beta")]);

        let count = stream_in(&root, "\\testfiles", std::io::Cursor::new(tar))
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(fs::read(root.join("testfiles/a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(root.join("testfiles/dir/b.txt")).unwrap(), b"beta");
    }

    #[tokio::test]
    async fn test_stream_in_rejects_traversal() {
        let base = temp_dir();
        let root = base.join("root");
        fs::create_dir_all(&root).unwrap();

        let tar = raw_archive("../../escape.txt", b"nope");
        let result = stream_in(&root, "/in", std::io::Cursor::new(tar)).await;

        assert!(matches!(result, Err(TransferError::PathEscape(_))));
        assert!(!base.join("escape.txt").exists());
        assert!(!base.parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_stream_in_rejects_escaping_target() {
        let root = temp_dir();
        let result = stream_in(&root, "../outside", std::io::Cursor::new(Vec::new())).await;
        assert!(matches!(result, Err(TransferError::PathEscape(_))));
    }

    #[tokio::test]
    async fn test_stream_in_malformed() {
        let root = temp_dir();
        let garbage = vec![0xffu8; 700];
        let result = stream_in(&root, "/", std::io::Cursor::new(garbage)).await;
        assert!(matches!(result, Err(TransferError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_stream_in_refuses_symlinked_parent() {
        let base = temp_dir();
        let root = base.join("root");
        let outside = base.join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let tar = archive(&[("link/x.txt", b"x")]);
        let result = stream_in(&root, "/", std::io::Cursor::new(tar)).await;

        assert!(matches!(result, Err(TransferError::PathEscape(_))));
        assert!(!outside.join("x.txt").exists());
    }

    #[tokio::test]
    async fn test_stream_in_keeps_entries_before_failure() {
        let base = temp_dir();
        let root = base.join("root");
        fs::create_dir_all(&root).unwrap();

        let mut bytes = raw_entry("good.txt", b"good");
        bytes.extend(raw_entry("../../escape.txt", b"nope"));
        bytes.extend(raw_entry("after.txt", b"after"));
        bytes.extend_from_slice(&[0u8; 1024]);
        bytes.extend_from_slice(&[0x5a; 1536]);
        let total = bytes.len();

        let served = Arc::new(AtomicUsize::new(0));
        let reader = CountingReader {
            inner: std::io::Cursor::new(bytes),
            served: Arc::clone(&served),
        };
        let result = stream_in(&root, "/in", reader).await;

        assert!(matches!(result, Err(TransferError::PathEscape(_))));
        assert_eq!(fs::read(root.join("in/good.txt")).unwrap(), b"good");
        assert!(!root.join("in/after.txt").exists());
        assert!(!base.join("escape.txt").exists());
        // the sender is never left blocked on unread input
        assert_eq!(served.load(Ordering::SeqCst), total);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stream_in_same_directory() {
        let root = temp_dir();
        let tar = archive(&[("shared.txt", b"same"), ("dir/shared.txt", b"same")]);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let root = root.clone();
                let tar = tar.clone();
                tokio::spawn(async move { stream_in(&root, "/out", std::io::Cursor::new(tar)).await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 2);
        }

        assert_eq!(fs::read(root.join("out/shared.txt")).unwrap(), b"same");
        assert_eq!(fs::read(root.join("out/dir/shared.txt")).unwrap(), b"same");
        let leftovers = fs::read_dir(root.join("out"))
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".corral-partial"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_staging_paths_are_unique() {
        let parent = Path::new("/sandbox/out");
        let first = staging_path(parent, "a.txt");
        let second = staging_path(parent, "a.txt");
        assert_ne!(first, second);
        assert_eq!(first.parent(), Some(parent));
    }

    #[tokio::test]
    async fn test_stream_out_refuses_symlinked_parent() {
        let base = temp_dir();
        let root = base.join("root");
        let outside = base.join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("secret.txt"), "host secret").unwrap();
        std::os::unix::fs::symlink("../outside", root.join("link")).unwrap();

        let result = stream_out(&root, "/link/secret.txt").await;
        assert!(matches!(result, Err(TransferError::PathEscape(_))));

        // the link itself is archived as a link, not followed
        let bytes = stream_out(&root, "/link")
            .await
            .unwrap()
            .into_bytes()
            .await
            .unwrap();
        let mut archive = Archive::new(&bytes[..]);
        let kinds: Vec<EntryType> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().header().entry_type())
            .collect();
        assert_eq!(kinds, vec![EntryType::Symlink]);
    }

    #[tokio::test]
    async fn test_stream_out_failure_is_not_end_of_stream() {
        let root = temp_dir();
        fs::create_dir_all(root.join("data")).unwrap();
        fs::write(root.join("data/a.txt"), "alpha").unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(root.join("data/sock")).unwrap();

        let mut stream = stream_out(&root, "/data").await.unwrap();
        let mut bytes = Vec::new();
        assert!(stream.read_to_end(&mut bytes).await.is_err());
        assert!(matches!(
            stream.finish().await,
            Err(TransferError::Read { .. })
        ));

        // piping the failed stream into another root fails too
        let stream = stream_out(&root, "/data").await.unwrap();
        let copy = temp_dir();
        assert!(stream_in(&copy, "/", stream).await.is_err());
        assert!(matches!(
            stream_out(&root, "/data").await.unwrap().into_bytes().await,
            Err(TransferError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_out_directory_round_trip() {
        let root = temp_dir();
        fs::create_dir_all(root.join("data/dir")).unwrap();
        fs::write(root.join("data/a.txt"), "alpha").unwrap();
        fs::write(root.join("data/dir/b.txt"), "beta").unwrap();

        let bytes = stream_out(&root, "c:\\data")
            .await
            .unwrap()
            .into_bytes()
            .await
            .unwrap();

        let copy = temp_dir();
        stream_in(&copy, "/", std::io::Cursor::new(bytes))
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(copy.join("a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(copy.join("dir/b.txt")).unwrap(), "beta");
    }

    #[tokio::test]
    async fn test_stream_out_single_file() {
        let root = temp_dir();
        fs::write(root.join("note.txt"), "hi").unwrap();

        let stream = stream_out(&root, "/note.txt").await.unwrap();
        let bytes = stream.into_bytes().await.unwrap();

        let mut archive = Archive::new(&bytes[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["note.txt"]);
    }

    #[tokio::test]
    async fn test_stream_out_missing_source() {
        let root = temp_dir();
        let result = stream_out(&root, "/nope").await;
        assert!(matches!(result, Err(TransferError::NotFound(_))));
    }
}
