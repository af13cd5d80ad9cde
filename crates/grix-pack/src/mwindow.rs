//! Memory-map windows over packfiles.
//!
//! All packs share one window fleet: fixed-size mmap windows aligned to
//! half-window boundaries, recycled least-recently-used once the total
//! mapped size passes the configured limit. Every fleet mutation happens
//! under a single lock. Callers receive pinned views — a view holds the
//! window's map alive, so eviction can never invalidate bytes a reader is
//! still looking at.

use std::fs::File;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use memmap2::{Mmap, MmapOptions};

use crate::PackError;

#[cfg(target_pointer_width = "64")]
const DEFAULT_WINDOW_SIZE: u64 = 1 << 30;
#[cfg(target_pointer_width = "64")]
const DEFAULT_MAPPED_LIMIT: u64 = 8 << 30;

#[cfg(not(target_pointer_width = "64"))]
const DEFAULT_WINDOW_SIZE: u64 = 32 << 20;
#[cfg(not(target_pointer_width = "64"))]
const DEFAULT_MAPPED_LIMIT: u64 = 256 << 20;

/// mmap offsets must be page-aligned.
const PAGE: u64 = 4096;

/// Slack past the requested span: room for a trailing OID or entry header.
const WINDOW_SLACK: u64 = 20;

/// The shared fleet of pack windows.
pub struct WindowManager {
    window_size: u64,
    mapped_limit: u64,
    next_file_id: AtomicU64,
    state: Mutex<Fleet>,
}

#[derive(Default)]
struct Fleet {
    windows: Vec<Window>,
    mapped: u64,
    use_ctr: u64,
}

struct Window {
    file_id: u64,
    start: u64,
    len: u64,
    map: Arc<Mmap>,
    last_used: u64,
}

/// A file registered with the window manager. Dropping it releases all of
/// its windows from the fleet.
pub struct WindowedFile {
    file: File,
    len: u64,
    id: u64,
    manager: Arc<WindowManager>,
}

impl WindowedFile {
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for WindowedFile {
    fn drop(&mut self) {
        self.manager.forget_file(self.id);
    }
}

/// A pinned byte view into one window, starting at the requested offset
/// and running to the window's end.
pub struct WindowView {
    map: Arc<Mmap>,
    start: usize,
    len: usize,
}

impl Deref for WindowView {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.map[self.start..self.start + self.len]
    }
}

impl WindowManager {
    /// Create an isolated manager (tests, embedders with custom limits).
    pub fn new(window_size: u64, mapped_limit: u64) -> Arc<Self> {
        Arc::new(Self {
            window_size: window_size.max(2 * PAGE),
            mapped_limit,
            next_file_id: AtomicU64::new(1),
            state: Mutex::new(Fleet::default()),
        })
    }

    /// The process-wide default manager.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<WindowManager>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| {
            WindowManager::new(DEFAULT_WINDOW_SIZE, DEFAULT_MAPPED_LIMIT)
        }))
    }

    /// Register a file for windowed access.
    pub fn open_file(self: &Arc<Self>, path: &Path) -> std::io::Result<WindowedFile> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(WindowedFile {
            file,
            len,
            id: self.next_file_id.fetch_add(1, Ordering::Relaxed),
            manager: Arc::clone(self),
        })
    }

    /// Return a view of at least `extra + 20` bytes starting at `offset`
    /// (clamped to the end of the file), entirely within one window.
    pub fn open(&self, wf: &WindowedFile, offset: u64, extra: usize) -> Result<WindowView, PackError> {
        if offset >= wf.len {
            return Err(PackError::CorruptEntry {
                offset,
                reason: "offset past end of file".into(),
            });
        }
        let needed_end = (offset + extra as u64 + WINDOW_SLACK).min(wf.len);

        let mut fleet = self.state.lock().unwrap();
        fleet.use_ctr += 1;
        let stamp = fleet.use_ctr;

        if let Some(window) = fleet
            .windows
            .iter_mut()
            .find(|w| w.file_id == wf.id && w.start <= offset && needed_end <= w.start + w.len)
        {
            window.last_used = stamp;
            return Ok(view_of(window, offset));
        }

        // Map a new window aligned to a half-window boundary.
        let half = ((self.window_size / 2).max(PAGE) / PAGE) * PAGE;
        let start = (offset / half) * half;
        let mut len = self.window_size.min(wf.len - start);
        if start + len < needed_end {
            len = needed_end - start;
        }

        // Recycle least-recently-used unpinned windows until the new one
        // fits under the mapped limit (or nothing more can go).
        while fleet.mapped + len > self.mapped_limit {
            let lru = fleet
                .windows
                .iter()
                .enumerate()
                .filter(|(_, w)| Arc::strong_count(&w.map) == 1)
                .min_by_key(|(_, w)| w.last_used)
                .map(|(i, _)| i);
            match lru {
                Some(i) => {
                    let closed = fleet.windows.swap_remove(i);
                    fleet.mapped -= closed.len;
                }
                None => break,
            }
        }

        let map = unsafe {
            MmapOptions::new()
                .offset(start)
                .len(len as usize)
                .map(&wf.file)?
        };
        let window = Window {
            file_id: wf.id,
            start,
            len,
            map: Arc::new(map),
            last_used: stamp,
        };
        let view = view_of(&window, offset);
        fleet.mapped += len;
        fleet.windows.push(window);
        Ok(view)
    }

    /// Total bytes currently mapped (for tests and diagnostics).
    pub fn mapped_bytes(&self) -> u64 {
        self.state.lock().unwrap().mapped
    }

    fn forget_file(&self, file_id: u64) {
        let mut fleet = self.state.lock().unwrap();
        let windows = std::mem::take(&mut fleet.windows);
        let mut kept = Vec::with_capacity(windows.len());
        for window in windows {
            if window.file_id == file_id {
                fleet.mapped -= window.len;
            } else {
                kept.push(window);
            }
        }
        fleet.windows = kept;
    }
}

fn view_of(window: &Window, offset: u64) -> WindowView {
    let start = (offset - window.start) as usize;
    WindowView {
        map: Arc::clone(&window.map),
        start,
        len: window.len as usize - start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(len: usize) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let mut f = File::create(&path).unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        f.write_all(&data).unwrap();
        (dir, path)
    }

    #[test]
    fn view_contains_requested_span() {
        let (_dir, path) = temp_file(64 * 1024);
        let mgr = WindowManager::new(16 * 1024, 1 << 20);
        let wf = mgr.open_file(&path).unwrap();

        let view = mgr.open(&wf, 10_000, 100).unwrap();
        assert!(view.len() >= 120);
        assert_eq!(view[0], (10_000 % 251) as u8);
        assert_eq!(view[1], (10_001 % 251) as u8);
    }

    #[test]
    fn view_clamps_at_end_of_file() {
        let (_dir, path) = temp_file(5000);
        let mgr = WindowManager::new(16 * 1024, 1 << 20);
        let wf = mgr.open_file(&path).unwrap();

        let view = mgr.open(&wf, 4990, 0).unwrap();
        assert_eq!(view.len(), 10);
        assert!(mgr.open(&wf, 5000, 0).is_err());
    }

    #[test]
    fn windows_are_reused() {
        let (_dir, path) = temp_file(64 * 1024);
        let mgr = WindowManager::new(32 * 1024, 1 << 20);
        let wf = mgr.open_file(&path).unwrap();

        let _a = mgr.open(&wf, 100, 0).unwrap();
        let before = mgr.mapped_bytes();
        let _b = mgr.open(&wf, 200, 0).unwrap();
        assert_eq!(mgr.mapped_bytes(), before);
    }

    #[test]
    fn lru_eviction_respects_limit() {
        let (_dir, path) = temp_file(256 * 1024);
        // Two windows fit under the limit; a third forces eviction.
        let mgr = WindowManager::new(16 * 1024, 40 * 1024);
        let wf = mgr.open_file(&path).unwrap();

        for offset in [0u64, 64 * 1024, 128 * 1024, 192 * 1024] {
            let view = mgr.open(&wf, offset, 0).unwrap();
            assert_eq!(view[0], (offset % 251) as u8);
            drop(view);
        }
        assert!(mgr.mapped_bytes() <= 40 * 1024);
    }

    #[test]
    fn pinned_views_survive_eviction() {
        let (_dir, path) = temp_file(256 * 1024);
        let mgr = WindowManager::new(16 * 1024, 16 * 1024);
        let wf = mgr.open_file(&path).unwrap();

        let pinned = mgr.open(&wf, 0, 0).unwrap();
        // Churn through other windows; the pinned one cannot be recycled.
        for offset in [64 * 1024u64, 128 * 1024, 192 * 1024] {
            let _ = mgr.open(&wf, offset, 0).unwrap();
        }
        assert_eq!(pinned[0], 0);
        assert_eq!(pinned[250], 250);
    }

    #[test]
    fn dropping_the_file_releases_its_windows() {
        let (_dir, path) = temp_file(64 * 1024);
        let mgr = WindowManager::new(16 * 1024, 1 << 20);
        let wf = mgr.open_file(&path).unwrap();
        let _ = mgr.open(&wf, 0, 0);
        assert!(mgr.mapped_bytes() > 0);
        drop(wf);
        assert_eq!(mgr.mapped_bytes(), 0);
    }
}
