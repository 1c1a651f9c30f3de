//! `watch` subcommand.
//!
//! Emits an `add` for every entry present at startup, then one line per
//! change. Raw notify events are coalesced per path over a short window and
//! classified by comparing what was known before the window with what exists
//! after it, so a create followed by writes reports a single `add`.

use crate::files::path_error;
use hostshim_shared::constants::control::CANCEL_BYTE;
use hostshim_shared::errors::{ShimError, ShimResult};
use hostshim_shared::protocol::{FileEvent, FileEventKind};
use notify::{EventKind, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

const WATCH_DEBOUNCE: Duration = Duration::from_millis(100);

/// Watch `target`, printing events to stdout until stdin says stop.
pub fn run(target: &Path) -> ShimResult<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;

    let (stop_tx, stop_rx) = mpsc::channel(1);
    spawn_stdin_listener(stop_tx);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<FileEvent>();
    let printer = async move {
        while let Some(event) = event_rx.recv().await {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{event}")?;
            stdout.flush()?;
        }
        Ok::<_, ShimError>(())
    };

    runtime.block_on(async {
        tokio::try_join!(watch(target.to_path_buf(), event_tx, stop_rx), printer).map(|_| ())
    })
}

/// Signal `stop` on the cancel byte or when stdin closes.
fn spawn_stdin_listener(stop: mpsc::Sender<()>) {
    std::thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        let mut buf = [0u8; 256];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) if buf[..n].contains(&CANCEL_BYTE) => {
                    tracing::debug!("cancel byte received");
                    break;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
        let _ = stop.blocking_send(());
    });
}

/// What is being watched: a directory's direct children, or a single file
/// (watched through its parent so deletion and re-creation are seen).
struct Scope {
    dir: PathBuf,
    file: Option<PathBuf>,
}

impl Scope {
    fn resolve(target: &Path) -> ShimResult<Self> {
        let metadata = std::fs::metadata(target).map_err(|e| path_error(target, e))?;
        if metadata.is_dir() {
            return Ok(Self {
                dir: target.to_path_buf(),
                file: None,
            });
        }
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Ok(Self {
            dir,
            file: Some(target.to_path_buf()),
        })
    }

    fn contains(&self, path: &Path) -> bool {
        match &self.file {
            Some(file) => path == file,
            None => path != self.dir && path.parent() == Some(self.dir.as_path()),
        }
    }

    fn initial_entries(&self) -> ShimResult<Vec<PathBuf>> {
        if let Some(file) = &self.file {
            return Ok(vec![file.clone()]);
        }
        let mut entries = std::fs::read_dir(&self.dir)
            .map_err(|e| path_error(&self.dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect::<Vec<_>>();
        entries.sort();
        Ok(entries)
    }
}

/// Decide which event, if any, a debounced batch of changes to one path
/// amounts to.
///
/// `known` is whether the path existed before the batch, `exists` whether it
/// exists now, `touched` whether anything other than a removal happened.
pub(crate) fn classify(known: bool, exists: bool, touched: bool) -> Option<FileEventKind> {
    match (known, exists) {
        (false, true) => Some(FileEventKind::Added),
        (true, false) => Some(FileEventKind::Removed),
        (true, true) if touched => Some(FileEventKind::Changed),
        _ => None,
    }
}

/// Whether a raw event counts as touching the path. `None` means ignore it.
fn touches(kind: &EventKind) -> Option<bool> {
    match kind {
        EventKind::Access(_) => None,
        EventKind::Remove(_) => Some(false),
        _ => Some(true),
    }
}

fn file_event(kind: FileEventKind, path: &Path) -> FileEvent {
    let name = path
        .file_name()
        .map_or_else(|| path.to_string_lossy(), |n| n.to_string_lossy());
    FileEvent::new(kind, name.into_owned())
}

fn watch_error(target: &Path, err: notify::Error) -> ShimError {
    ShimError::Internal(format!("watch error on {}: {err}", target.display()))
}

/// Drop raw events queued before the initial listing was taken; the listing
/// already reflects them.
fn discard_queued(
    rx: &mut mpsc::Receiver<notify::Result<notify::Event>>,
    target: &Path,
) -> ShimResult<()> {
    while let Ok(res) = rx.try_recv() {
        res.map_err(|e| watch_error(target, e))?;
    }
    Ok(())
}

/// Watch `target` and send events until `stop` fires or closes.
pub async fn watch(
    target: PathBuf,
    events: mpsc::UnboundedSender<FileEvent>,
    mut stop: mpsc::Receiver<()>,
) -> ShimResult<()> {
    let scope = Scope::resolve(&target)?;

    let (tx, mut rx) = mpsc::channel(128);
    let mut watcher = notify::recommended_watcher(move |res| {
        if tx.blocking_send(res).is_err() {
            tracing::debug!("watch channel closed");
        }
    })
    .map_err(|e| ShimError::Internal(format!("failed to initialize watcher: {e}")))?;
    watcher
        .watch(&scope.dir, RecursiveMode::NonRecursive)
        .map_err(|e| ShimError::Internal(format!("failed to watch {}: {e}", target.display())))?;
    tracing::debug!(target = %target.display(), dir = %scope.dir.display(), "watching");

    let mut known: HashSet<PathBuf> = HashSet::new();
    for path in scope.initial_entries()? {
        let _ = events.send(file_event(FileEventKind::Added, &path));
        known.insert(path);
    }
    discard_queued(&mut rx, &target)?;

    let mut pending: HashMap<PathBuf, bool> = HashMap::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = stop.recv() => break,
            incoming = rx.recv() => match incoming {
                Some(Ok(event)) => {
                    let Some(touched) = touches(&event.kind) else {
                        continue;
                    };
                    for path in event.paths.into_iter().filter(|p| scope.contains(p)) {
                        *pending.entry(path).or_insert(false) |= touched;
                    }
                    if !pending.is_empty() && deadline.is_none() {
                        deadline = Some(Instant::now() + WATCH_DEBOUNCE);
                    }
                }
                Some(Err(e)) => return Err(watch_error(&target, e)),
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                let mut batch: Vec<(PathBuf, bool)> = pending.drain().collect();
                batch.sort();
                for (path, touched) in batch {
                    let was_known = known.contains(&path);
                    let exists = path.exists();
                    let Some(kind) = classify(was_known, exists, touched) else {
                        continue;
                    };
                    match kind {
                        FileEventKind::Added => {
                            known.insert(path.clone());
                        }
                        FileEventKind::Removed => {
                            known.remove(&path);
                        }
                        FileEventKind::Changed => {}
                    }
                    tracing::debug!(path = %path.display(), %kind, "event");
                    if events.send(file_event(kind, &path)).is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    tracing::debug!(target = %target.display(), "watch stopped");
    Ok(())
}
