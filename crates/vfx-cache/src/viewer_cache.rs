//! `ViewerCache`: the disk-backed frame cache with an in-RAM mapped sub-set.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;
use vfx_core::Rect;

use crate::channel::ChannelSet;
use crate::error::{CacheError, CacheResult};
use crate::frame::{FrameEntry, FrameEntryArc, FrameParams, TextureRect};
use crate::lru::{CacheEntry, LruContainer};
use crate::node_cache::CacheStats;

/// Key type for viewer cache entries: the folded fingerprint of a frame's
/// display identity, per [`FrameEntry::hash_key`].
pub type ViewerKey = u64;

/// The on-disk manifest format version. Bumping this forces a full
/// wipe-and-recreate of every existing cache the next time it is restored.
const MANIFEST_VERSION: &str = "vfx-viewer-cache-v1";

const MANIFEST_FILE: &str = "restoreFile.powc";

/// Parameters controlling a [`ViewerCache`]'s footprint and location.
#[derive(Debug, Clone)]
pub struct ViewerCacheConfig {
    /// Root directory under which `<name>/` is created. `None` resolves to
    /// the OS-appropriate cache directory via `dirs-next`.
    pub cache_root: Option<PathBuf>,
    /// Name of this cache instance; becomes the top-level subdirectory.
    pub name: String,
    /// Total on-disk budget in bytes, covering the mapped sub-set and the
    /// disk set together.
    pub max_size: usize,
    /// Fraction of `max_size` reserved for the mapped (in-RAM) sub-set.
    pub in_memory_fraction: f64,
}

impl ViewerCacheConfig {
    fn resolved_root(&self) -> CacheResult<PathBuf> {
        match &self.cache_root {
            Some(root) => Ok(root.clone()),
            None => dirs_next::cache_dir()
                .ok_or_else(|| CacheError::AllocationFailed("no OS cache directory available".into())),
        }
    }
}

struct ManifestEntry {
    key: ViewerKey,
    path: PathBuf,
    zoom: f32,
    exposure: f32,
    lut: String,
    tree_version: u64,
    byte_mode: bool,
    texture_rect: TextureRect,
}

struct State {
    mapped: LruContainer<ViewerKey, FrameEntryArc>,
    disk: LruContainer<ViewerKey, FrameEntryArc>,
    stats: CacheStats,
}

impl State {
    fn mapped_size(&self) -> usize {
        self.mapped.size_bytes()
    }

    fn disk_size(&self) -> usize {
        self.mapped.size_bytes() + self.disk.size_bytes()
    }
}

/// The process-wide, disk-backed frame cache sitting behind a viewer.
///
/// Holds two [`LruContainer`]s over the same value type: a **mapped
/// sub-set** of currently memory-mapped frames, and a **disk set** of
/// frames present on disk but unmapped. A key is present in exactly one of
/// the two at a time.
pub struct ViewerCache {
    root: PathBuf,
    config: ViewerCacheConfig,
    state: Mutex<State>,
}

impl ViewerCache {
    /// Creates (but does not populate) a cache rooted at
    /// `config.resolved_root()/config.name`, creating the 256 hex
    /// sub-folders if they don't already exist.
    pub fn new(config: ViewerCacheConfig) -> CacheResult<Self> {
        let root = config.resolved_root()?.join(&config.name);
        create_subfolders(&root)?;
        Ok(ViewerCache {
            root,
            config,
            state: Mutex::new(State {
                mapped: LruContainer::new(),
                disk: LruContainer::new(),
                stats: CacheStats::default(),
            }),
        })
    }

    /// Path where `key`'s data file lives: `<root>/XY/<remaining-hex>.powc`.
    pub fn path_for_key(&self, key: ViewerKey) -> PathBuf {
        path_for_key(&self.root, key)
    }

    /// Probes the mapped sub-set, then the disk set, remapping on a disk
    /// hit. Returns `None` if `key` is present in neither.
    pub fn get(&self, key: ViewerKey) -> CacheResult<Option<FrameEntry>> {
        let mut state = self.state.lock();
        if let Some(entry) = state.mapped.lookup(&key) {
            state.stats.hits += 1;
            return Ok(Some(entry.to_handle()));
        }
        if let Some(entry) = state.disk.peek(&key).cloned() {
            entry.remap()?;
            state.disk.remove(&key);
            let handle = entry.to_handle();
            state.mapped.insert(key, entry);
            self.evict_mapped_to_capacity(&mut state);
            state.stats.hits += 1;
            return Ok(Some(handle));
        }
        state.stats.misses += 1;
        Ok(None)
    }

    /// Allocates a new mapped frame under `key` and inserts it into the
    /// mapped sub-set, demoting/evicting as needed to respect the in-memory
    /// and disk budgets.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        key: ViewerKey,
        exposure: f32,
        lut: String,
        zoom: f32,
        tree_version: u64,
        byte_mode: bool,
        data_window: Rect,
        display_window: Rect,
        channels: ChannelSet,
        texture_rect: TextureRect,
    ) -> CacheResult<FrameEntry> {
        let path = self.path_for_key(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(CacheError::Io)?;
        }
        let params = FrameParams {
            path,
            exposure,
            lut,
            zoom,
            tree_version,
            byte_mode,
            data_window,
            display_window,
            channels,
            texture_rect,
        };
        let (entry_arc, handle) = FrameEntry::allocate(params)?;

        let mut state = self.state.lock();
        state.mapped.insert(key, entry_arc);
        self.evict_mapped_to_capacity(&mut state);
        self.evict_disk_to_capacity(&mut state);
        let current = state.disk_size();
        state.stats.peak_size = state.stats.peak_size.max(current);
        Ok(handle)
    }

    /// Demotes every removable mapped entry to the disk set. Non-removable
    /// entries are left mapped. A single pass: each entry is visited at
    /// most once, so a pinned entry can't cause an infinite loop.
    pub fn clear_in_memory(&self) -> CacheResult<()> {
        let mut state = self.state.lock();
        let keys: Vec<ViewerKey> = state.mapped.iter().map(|(k, _)| *k).collect();
        for key in keys {
            let is_removable = state.mapped.peek(&key).is_some_and(CacheEntry::is_removable);
            if !is_removable {
                continue;
            }
            if let Some(entry) = state.mapped.remove(&key) {
                entry.demote()?;
                state.disk.insert(key, entry);
            }
        }
        self.evict_disk_to_capacity(&mut state);
        Ok(())
    }

    /// Clears both sets, unlinks every data file under the root, and
    /// recreates the 256 sub-folders.
    pub fn clear_all(&self) -> CacheResult<()> {
        let mut state = self.state.lock();
        state.mapped = LruContainer::new();
        state.disk = LruContainer::new();
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(CacheError::Io)?;
        }
        create_subfolders(&self.root)?;
        Ok(())
    }

    /// Flushes the mapped sub-set to disk (via [`clear_in_memory`]) then
    /// writes the manifest: a version line followed by one descriptor line
    /// per on-disk entry.
    pub fn save(&self) -> CacheResult<()> {
        self.clear_in_memory()?;
        let state = self.state.lock();
        let manifest_path = self.root.join(MANIFEST_FILE);
        let mut out = String::new();
        out.push_str(MANIFEST_VERSION);
        out.push('\n');
        for (_, entry) in state.disk.iter() {
            out.push_str(&descriptor_line(entry));
            out.push('\n');
        }
        fs::write(&manifest_path, out).map_err(CacheError::Io)?;
        Ok(())
    }

    /// Reads the manifest and repopulates the disk set. Any inconsistency —
    /// a missing manifest, a version mismatch, or a manifest/file-count
    /// mismatch — wipes the cache and leaves it empty rather than risk
    /// serving a stale or partially-written entry.
    pub fn restore(&self) -> CacheResult<()> {
        let manifest_path = self.root.join(MANIFEST_FILE);
        let entries = match read_manifest(&manifest_path) {
            Ok(entries) => entries,
            Err(_) => {
                warn!("viewer cache manifest missing or unreadable, recreating");
                return self.clear_all();
            }
        };

        let actual_file_count = count_data_files(&self.root);
        if entries.len() != actual_file_count {
            warn!(
                manifest_count = entries.len(),
                actual_count = actual_file_count,
                "viewer cache manifest disagrees with on-disk file count, wiping"
            );
            return self.clear_all();
        }

        let mut state = self.state.lock();
        state.mapped = LruContainer::new();
        state.disk = LruContainer::new();
        for entry in entries {
            let window = Rect::from_size(entry.texture_rect.w, entry.texture_rect.h);
            let params = FrameParams {
                path: entry.path,
                exposure: entry.exposure,
                lut: entry.lut,
                zoom: entry.zoom,
                tree_version: entry.tree_version,
                byte_mode: entry.byte_mode,
                data_window: window,
                display_window: window,
                channels: ChannelSet::rgba(),
                texture_rect: entry.texture_rect,
            };
            let (entry_arc, handle) = FrameEntry::allocate(params)?;
            entry_arc.demote()?;
            drop(handle);
            state.disk.insert(entry.key, entry_arc);
        }
        Ok(())
    }

    /// A snapshot of current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Bytes currently resident in the mapped sub-set.
    pub fn mapped_size(&self) -> usize {
        self.state.lock().mapped_size()
    }

    /// Bytes currently resident across both sets.
    pub fn total_size(&self) -> usize {
        self.state.lock().disk_size()
    }

    fn mapped_capacity(&self) -> usize {
        (self.config.max_size as f64 * self.config.in_memory_fraction) as usize
    }

    fn evict_mapped_to_capacity(&self, state: &mut State) {
        let cap = self.mapped_capacity();
        let guard_bound = state.mapped.len() + 1;
        let mut guard = 0;
        while state.mapped_size() > cap && guard < guard_bound {
            guard += 1;
            match state.mapped.evict() {
                Some((key, entry)) => {
                    if entry.demote().is_err() {
                        warn!("failed to demote mapped viewer cache entry during eviction");
                    }
                    state.disk.insert(key, entry);
                }
                None => break, // emergency contract: every mapped entry pinned
            }
        }
    }

    fn evict_disk_to_capacity(&self, state: &mut State) {
        let cap = self.config.max_size;
        let guard_bound = state.disk.len() + 1;
        let mut guard = 0;
        while state.disk_size() > cap && guard < guard_bound {
            guard += 1;
            match state.disk.evict() {
                Some((_, entry)) => {
                    if fs::remove_file(entry.path()).is_err() {
                        warn!("failed to unlink evicted viewer cache file");
                    }
                    state.stats.evictions += 1;
                }
                None => break, // emergency contract: every disk entry pinned
            }
        }
    }
}

fn path_for_key(root: &Path, key: ViewerKey) -> PathBuf {
    let top = (key >> 56) & 0xff;
    let remaining = key & 0x00ff_ffff_ffff_ffff;
    root.join(format!("{top:02x}")).join(format!("{remaining:014x}.powc"))
}

fn create_subfolders(root: &Path) -> CacheResult<()> {
    fs::create_dir_all(root).map_err(CacheError::Io)?;
    for byte in 0u16..256 {
        fs::create_dir_all(root.join(format!("{byte:02x}"))).map_err(CacheError::Io)?;
    }
    Ok(())
}

fn count_data_files(root: &Path) -> usize {
    let mut count = 0;
    for byte in 0u16..256 {
        let dir = root.join(format!("{byte:02x}"));
        let Ok(entries) = fs::read_dir(&dir) else { continue };
        count += entries
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "powc"))
            .count();
    }
    count
}

/// Recovers a key from the path it was written under: the parent folder
/// name is the top hex byte, the file stem is the remaining 56 bits.
fn key_from_path(path: &Path) -> CacheResult<ViewerKey> {
    let bad = || CacheError::CacheCorrupt(format!("unrecognised cache path: {}", path.display()));
    let top = path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()).ok_or_else(bad)?;
    let stem = path.file_stem().and_then(|n| n.to_str()).ok_or_else(bad)?;
    let top = u64::from_str_radix(top, 16).map_err(|_| bad())?;
    let remaining = u64::from_str_radix(stem, 16).map_err(|_| bad())?;
    Ok((top << 56) | remaining)
}

fn descriptor_line(entry: &FrameEntryArc) -> String {
    let tr = entry.texture_rect();
    format!(
        "{} {} {} {} {} {} {} {} {} {} {} {} {}",
        entry.path().display(),
        entry.zoom(),
        entry.exposure(),
        entry.lut(),
        entry.tree_version(),
        entry.byte_mode() as u8,
        "-", // reserved ReaderInfo slot; no decoder-specific state is tracked here
        tr.x,
        tr.y,
        tr.r,
        tr.t,
        tr.w,
        tr.h,
    )
}

fn read_manifest(path: &Path) -> CacheResult<Vec<ManifestEntry>> {
    let file = fs::File::open(path).map_err(CacheError::Io)?;
    let mut lines = BufReader::new(file).lines();

    let version = lines
        .next()
        .ok_or_else(|| CacheError::CacheCorrupt("empty manifest".into()))?
        .map_err(CacheError::Io)?;
    if version != MANIFEST_VERSION {
        return Err(CacheError::CacheCorrupt(format!("manifest version mismatch: {version}")));
    }

    let mut entries = Vec::new();
    for line in lines {
        let line = line.map_err(CacheError::Io)?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(parse_descriptor_line(&line)?);
    }
    Ok(entries)
}

fn parse_descriptor_line(line: &str) -> CacheResult<ManifestEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 13 {
        return Err(CacheError::CacheCorrupt(format!("malformed descriptor line: {line}")));
    }
    let bad = |what: &str| CacheError::CacheCorrupt(format!("invalid {what} in descriptor: {line}"));

    let path = PathBuf::from(fields[0]);
    let key = key_from_path(&path)?;
    let zoom: f32 = fields[1].parse().map_err(|_| bad("zoom"))?;
    let exposure: f32 = fields[2].parse().map_err(|_| bad("exposure"))?;
    let lut = fields[3].to_string();
    let tree_version: u64 = fields[4].parse().map_err(|_| bad("treeVersion"))?;
    let byte_mode = fields[5] == "1";
    // fields[6] is the reserved ReaderInfo slot.
    let tex_x: i32 = fields[7].parse().map_err(|_| bad("texX"))?;
    let tex_y: i32 = fields[8].parse().map_err(|_| bad("texY"))?;
    let tex_r: i32 = fields[9].parse().map_err(|_| bad("texR"))?;
    let tex_t: i32 = fields[10].parse().map_err(|_| bad("texT"))?;
    let tex_w: u32 = fields[11].parse().map_err(|_| bad("texW"))?;
    let tex_h: u32 = fields[12].parse().map_err(|_| bad("texH"))?;

    let texture_rect = TextureRect { x: tex_x, y: tex_y, r: tex_r, t: tex_t, w: tex_w, h: tex_h };
    Ok(ManifestEntry {
        key,
        path,
        zoom,
        exposure,
        lut,
        tree_version,
        byte_mode,
        texture_rect,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn texture_rect() -> TextureRect {
        TextureRect { x: 0, y: 0, r: 512, t: 512, w: 512, h: 512 } // 512*512*4 = 1 MiB
    }

    fn config(root: PathBuf, max_size: usize, in_memory_fraction: f64) -> ViewerCacheConfig {
        ViewerCacheConfig { cache_root: Some(root), name: "viewer".into(), max_size, in_memory_fraction }
    }

    fn add_frame(cache: &ViewerCache, key: ViewerKey, tree_version: u64) -> FrameEntry {
        cache
            .add(
                key,
                0.0,
                "linear".into(),
                1.0,
                tree_version,
                true,
                Rect::new(0, 0, 512, 512),
                Rect::new(0, 0, 512, 512),
                ChannelSet::rgba(),
                texture_rect(),
            )
            .unwrap()
    }

    #[test]
    fn demote_then_restore_respects_in_memory_and_disk_budgets() {
        let dir = tempdir().unwrap();
        let one_mib = 1024 * 1024;
        let cache = ViewerCache::new(config(dir.path().to_path_buf(), 4 * one_mib, 0.25)).unwrap();

        for i in 1..=8u64 {
            let frame = add_frame(&cache, i, 1);
            drop(frame);
        }

        assert_eq!(cache.mapped_size(), one_mib, "mapped sub-set must hold exactly 1 frame");
        assert_eq!(cache.total_size(), 4 * one_mib, "disk budget holds the 4 most recent frames");
        for key in 1..=4 {
            assert!(cache.get(key).unwrap().is_none(), "oldest frames must have been evicted");
        }
        assert!(cache.get(8).unwrap().is_some());

        cache.clear_in_memory().unwrap();
        assert_eq!(cache.mapped_size(), 0);
        assert_eq!(cache.total_size(), 4 * one_mib);

        let remapped = cache.get(8).unwrap().expect("F8 must remap from the disk set");
        assert!(remapped.is_mapped());
        assert!(cache.mapped_size() >= one_mib);
    }

    #[test]
    fn corruption_wipe_on_entry_count_mismatch() {
        let dir = tempdir().unwrap();
        let one_mib = 1024 * 1024;
        let cache = ViewerCache::new(config(dir.path().to_path_buf(), 4 * one_mib, 1.0)).unwrap();
        let frame = add_frame(&cache, 1, 1);
        let path = frame.path().to_path_buf();
        drop(frame);
        cache.save().unwrap();

        // Corrupt the cache by deleting a data file the manifest still refers to.
        fs::remove_file(&path).unwrap();

        cache.restore().unwrap();
        assert_eq!(cache.total_size(), 0, "corrupted cache must restore empty");
        assert!(cache.get(1).unwrap().is_none());

        // Subsequent adds must still succeed.
        let frame = add_frame(&cache, 2, 1);
        assert_eq!(frame.zoom(), 1.0);
    }

    #[test]
    fn two_tier_conservation_no_duplicate_membership() {
        let dir = tempdir().unwrap();
        let one_mib = 1024 * 1024;
        let cache = ViewerCache::new(config(dir.path().to_path_buf(), 4 * one_mib, 0.5)).unwrap();
        for i in 1..=3u64 {
            drop(add_frame(&cache, i, 1));
        }
        let state = cache.state.lock();
        for key in 1..=3u64 {
            let in_mapped = state.mapped.contains_key(&key);
            let in_disk = state.disk.contains_key(&key);
            assert!(in_mapped ^ in_disk, "key {key} must be in exactly one tier");
        }
    }
}
