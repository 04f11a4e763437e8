//! Tile loading, inline or on a pool of worker threads.
//!
//! Workers never read files or resample elevation while holding the tree
//! lock. Each request reads its files unlocked, splices them into the tree
//! under the lock, derives ancestor elevation and builds the mesh unlocked,
//! and attaches both under the lock again. Requests for pruned
//! nodes are cancelled before they start, and their results are dropped if
//! they finish anyway: node ids are generation checked.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};
use dashmap::DashMap;

use crate::key::TileKey;
use crate::quadtree::{NodeId, QuadTree};
use crate::selector::ChildLoader;
use crate::surface_tile::{SurfaceEnv, SurfaceTile, TileFiles, attach, load_tile_sync, splice};
use crate::tile::Tile;

/// Queued requests before new ones are turned away for a frame.
pub const LOAD_QUEUE_CAPACITY: usize = 512;

/// The tile tree shared between the render thread and the loader.
pub type SharedTree = Arc<Mutex<QuadTree<SurfaceTile>>>;

/// Lock the tree, recovering it if a thread panicked while holding it.
pub fn lock_tree(tree: &SharedTree) -> MutexGuard<'_, QuadTree<SurfaceTile>> {
    tree.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How tiles are loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadMode {
    /// Load inline while the tree is being traversed.
    Sync,
    /// Load on `threads` worker threads; `0` picks a count from the CPU.
    Async { threads: usize },
}

struct LoadRequest {
    node: NodeId,
    key: TileKey,
    cancelled: Arc<AtomicBool>,
}

struct LoaderPool {
    sender: Option<Sender<LoadRequest>>,
    workers: Vec<JoinHandle<()>>,
    active: Arc<DashMap<NodeId, Arc<AtomicBool>>>,
    in_flight: Arc<AtomicU64>,
}

/// Loads tiles on behalf of the selector.
pub struct TileLoader {
    env: Arc<SurfaceEnv>,
    pool: Option<LoaderPool>,
}

fn default_threads() -> usize {
    let cpus = num_cpus::get().max(2);
    (cpus - 2).max(1)
}

fn run_request(tree: &SharedTree, env: &SurfaceEnv, req: &LoadRequest) {
    let files = TileFiles::read(req.key, env);
    let job = {
        let mut tree = lock_tree(tree);
        splice(&mut tree, req.node, files, env)
    };
    let Some(job) = job else {
        return;
    };
    if req.cancelled.load(Ordering::Relaxed) {
        return;
    }
    let loaded = job.build(env);
    let mut tree = lock_tree(tree);
    if !req.cancelled.load(Ordering::Relaxed) {
        attach(&mut tree, req.node, loaded);
    }
}

fn worker_loop(
    receiver: Receiver<LoadRequest>,
    tree: SharedTree,
    env: Arc<SurfaceEnv>,
    active: Arc<DashMap<NodeId, Arc<AtomicBool>>>,
    in_flight: Arc<AtomicU64>,
) {
    while let Ok(req) = receiver.recv() {
        if !req.cancelled.load(Ordering::Relaxed) {
            run_request(&tree, &env, &req);
        }
        active.remove_if(&req.node, |_, flag| Arc::ptr_eq(flag, &req.cancelled));
        in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

impl LoaderPool {
    fn spawn(threads: usize, tree: &SharedTree, env: &Arc<SurfaceEnv>) -> std::io::Result<Self> {
        let (sender, receiver) = bounded::<LoadRequest>(LOAD_QUEUE_CAPACITY);
        let active = Arc::new(DashMap::new());
        let in_flight = Arc::new(AtomicU64::new(0));

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver = receiver.clone();
            let tree = Arc::clone(tree);
            let env = Arc::clone(env);
            let active = Arc::clone(&active);
            let in_flight = Arc::clone(&in_flight);
            let handle = std::thread::Builder::new()
                .name(format!("tile-loader-{i}"))
                .spawn(move || worker_loop(receiver, tree, env, active, in_flight))?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
            active,
            in_flight,
        })
    }

    /// Queue a request. Returns `false` if the queue is full.
    fn submit(&self, node: NodeId, key: TileKey) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        let cancelled = Arc::new(AtomicBool::new(false));
        self.active.insert(node, Arc::clone(&cancelled));
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let req = LoadRequest { node, key, cancelled };
        match sender.try_send(req) {
            Ok(()) => true,
            Err(e) => {
                self.in_flight.fetch_sub(1, Ordering::Relaxed);
                let req = e.into_inner();
                self.active
                    .remove_if(&req.node, |_, flag| Arc::ptr_eq(flag, &req.cancelled));
                false
            }
        }
    }

    fn cancel(&self, node: NodeId) {
        if let Some((_, cancelled)) = self.active.remove(&node) {
            cancelled.store(true, Ordering::Relaxed);
        }
    }
}

impl Drop for LoaderPool {
    fn drop(&mut self) {
        for entry in self.active.iter() {
            entry.value().store(true, Ordering::Relaxed);
        }
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("tile loader thread panicked");
            }
        }
    }
}

impl TileLoader {
    /// A loader for `tree`. Falls back to inline loading if worker threads
    /// cannot be spawned.
    pub fn new(tree: &SharedTree, env: Arc<SurfaceEnv>, mode: LoadMode) -> Self {
        let pool = match mode {
            LoadMode::Sync => None,
            LoadMode::Async { threads } => {
                let threads = if threads == 0 { default_threads() } else { threads };
                match LoaderPool::spawn(threads, tree, &env) {
                    Ok(pool) => {
                        tracing::info!(threads, "tile loader started");
                        Some(pool)
                    }
                    Err(e) => {
                        tracing::warn!("cannot spawn tile loader threads, loading inline: {e}");
                        None
                    }
                }
            }
        };
        Self { env, pool }
    }

    pub fn env(&self) -> &Arc<SurfaceEnv> {
        &self.env
    }

    pub fn is_async(&self) -> bool {
        self.pool.is_some()
    }

    /// Requests queued or running.
    pub fn pending(&self) -> u64 {
        self.pool
            .as_ref()
            .map_or(0, |p| p.in_flight.load(Ordering::Relaxed))
    }

    /// Load `node` now, bypassing the worker pool.
    pub fn load_now(&self, tree: &mut QuadTree<SurfaceTile>, node: NodeId) -> bool {
        load_tile_sync(tree, node, &self.env)
    }

    /// Start loading `node`, inline or in the background.
    pub fn request(&self, tree: &mut QuadTree<SurfaceTile>, node: NodeId) {
        let Some(pool) = &self.pool else {
            self.load_now(tree, node);
            return;
        };
        let Some(tile) = tree.get_mut(node) else {
            return;
        };
        let key = tile.key();
        tile.core_mut().load_pending = true;
        if !pool.submit(node, key) {
            // retried when the selector next visits the tile
            tile.core_mut().load_pending = false;
            tracing::trace!(tile = %key, "load queue full");
        }
    }

    /// Drop the pending request for `node`, if any.
    pub fn cancel(&self, node: NodeId) {
        if let Some(pool) = &self.pool {
            pool.cancel(node);
        }
    }
}

impl ChildLoader<SurfaceTile> for TileLoader {
    fn load_child(
        &mut self,
        tree: &mut QuadTree<SurfaceTile>,
        parent: NodeId,
        quadrant: usize,
    ) -> Option<NodeId> {
        let key = tree.get(parent)?.key().child(quadrant);
        let id = tree.add_child(parent, quadrant, SurfaceTile::new(key))?;
        self.request(tree, id);
        Some(id)
    }

    fn reload(&mut self, tree: &mut QuadTree<SurfaceTile>, node: NodeId) {
        if tree.get(node).is_some_and(|t| !t.core().load_pending) {
            self.request(tree, node);
        }
    }

    fn pruned(&mut self, removed: &[NodeId]) {
        for &node in removed {
            self.cancel(node);
        }
    }
}
