//! Path reservations for concurrent extraction.
//!
//! Every job names the paths it is going to create or replace. A job holds
//! each of those paths exclusively, and shares each of their ancestor
//! directories with other jobs. A job starts once it is first in line for
//! all of its paths and part of the leading group for all of its
//! ancestors; it keeps its reservations until its [`Release`] is dropped.
//!
//! Keys are compared after Unicode NFD normalization and lowercasing, so
//! names that a case-insensitive or normalizing filesystem would treat as
//! the same file are serialized too.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use unicode_normalization::UnicodeNormalization;

type Job = Box<dyn FnOnce(Release) + Send>;

#[derive(Debug)]
enum Slot {
    Exclusive(u64),
    Shared(BTreeSet<u64>),
}

struct Reservation {
    paths: Vec<String>,
    dirs: Vec<String>,
    job: Option<Job>,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<Slot>>,
    reservations: HashMap<u64, Reservation>,
    next_id: u64,
}

fn key(path: &Path) -> String {
    let text = path.to_string_lossy();
    let text = text.strip_suffix('/').filter(|t| !t.is_empty()).unwrap_or(&*text);
    text.nfd().collect::<String>().to_lowercase()
}

/// Every proper ancestor of `key`, `/` included.
fn ancestors(key: &str) -> impl Iterator<Item = String> + '_ {
    Path::new(key)
        .ancestors()
        .skip(1)
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_string_lossy().into_owned())
}

impl Inner {
    fn ready(&self, id: u64) -> bool {
        let Some(reservation) = self.reservations.get(&id) else {
            return false;
        };
        let front = |key: &String| self.queues.get(key).and_then(VecDeque::front);
        reservation
            .paths
            .iter()
            .all(|p| matches!(front(p), Some(Slot::Exclusive(x)) if *x == id))
            && reservation
                .dirs
                .iter()
                .all(|d| matches!(front(d), Some(Slot::Shared(set)) if set.contains(&id)))
    }

    fn take_if_ready(&mut self, id: u64) -> Option<Job> {
        if !self.ready(id) {
            return None;
        }
        self.reservations.get_mut(&id)?.job.take()
    }

    /// Drop `id` from the front of its queues and return the jobs that
    /// became runnable.
    fn release(&mut self, id: u64) -> Vec<(u64, Job)> {
        let Some(reservation) = self.reservations.remove(&id) else {
            return Vec::new();
        };
        let mut candidates = BTreeSet::new();
        let front_ids = |queue: &VecDeque<Slot>, out: &mut BTreeSet<u64>| match queue.front() {
            Some(Slot::Exclusive(next)) => {
                out.insert(*next);
            }
            Some(Slot::Shared(set)) => out.extend(set.iter().copied()),
            None => {}
        };

        for path in &reservation.paths {
            let Some(queue) = self.queues.get_mut(path) else {
                continue;
            };
            debug_assert!(matches!(queue.front(), Some(Slot::Exclusive(x)) if *x == id));
            queue.pop_front();
            if queue.is_empty() {
                self.queues.remove(path);
            } else {
                front_ids(queue, &mut candidates);
            }
        }

        for dir in &reservation.dirs {
            let Some(queue) = self.queues.get_mut(dir) else {
                continue;
            };
            let Some(Slot::Shared(set)) = queue.front_mut() else {
                debug_assert!(false, "directory reservation not at the front");
                continue;
            };
            set.remove(&id);
            if set.is_empty() {
                queue.pop_front();
                if queue.is_empty() {
                    self.queues.remove(dir);
                } else {
                    front_ids(queue, &mut candidates);
                }
            }
        }

        candidates
            .into_iter()
            .filter_map(|next| self.take_if_ready(next).map(|job| (next, job)))
            .collect()
    }
}

/// Held by a running job; dropping it releases the job's reservations and
/// starts whatever was waiting on them.
pub struct Release {
    inner: Arc<Mutex<Inner>>,
    id: u64,
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Release").field("id", &self.id).finish()
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        let ready = lock(&self.inner).release(self.id);
        log::trace!("reservation {} released, {} job(s) ready", self.id, ready.len());
        run(&self.inner, ready);
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run(inner: &Arc<Mutex<Inner>>, jobs: Vec<(u64, Job)>) {
    for (id, job) in jobs {
        job(Release {
            inner: Arc::clone(inner),
            id,
        });
    }
}

/// Scheduler serializing jobs that touch overlapping paths.
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use tar_fs::PathReservations;
///
/// let reservations = PathReservations::new();
/// let order = Arc::new(Mutex::new(Vec::new()));
///
/// let first = Arc::new(Mutex::new(None));
/// let slot = Arc::clone(&first);
/// reservations.reserve(["/out/a"], move |release| *slot.lock().unwrap() = Some(release));
///
/// let log = Arc::clone(&order);
/// let ran = reservations.reserve(["/out/a/b"], move |_| log.lock().unwrap().push("b"));
/// assert!(!ran);
///
/// first.lock().unwrap().take();
/// assert_eq!(*order.lock().unwrap(), ["b"]);
/// assert!(reservations.is_idle());
/// ```
#[derive(Clone, Default)]
pub struct PathReservations {
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for PathReservations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("PathReservations")
            .field("queues", &inner.queues)
            .field("pending", &inner.reservations.len())
            .finish()
    }
}

impl PathReservations {
    /// An empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job` behind everything already holding `paths` or an
    /// ancestor of them.
    ///
    /// The job runs on the calling thread if it can start immediately, and
    /// otherwise on whichever thread drops the last conflicting
    /// [`Release`]. Returns whether it ran immediately.
    pub fn reserve<I, P>(&self, paths: I, job: impl FnOnce(Release) + Send + 'static) -> bool
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let paths: BTreeSet<String> = paths.into_iter().map(|p| key(p.as_ref())).collect();
        let dirs: BTreeSet<String> = paths
            .iter()
            .flat_map(|p| ancestors(p))
            .filter(|d| !paths.contains(d))
            .collect();

        let ready = {
            let mut inner = lock(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;

            for path in &paths {
                inner
                    .queues
                    .entry(path.clone())
                    .or_default()
                    .push_back(Slot::Exclusive(id));
            }
            for dir in &dirs {
                let queue = inner.queues.entry(dir.clone()).or_default();
                match queue.back_mut() {
                    Some(Slot::Shared(set)) => {
                        set.insert(id);
                    }
                    _ => queue.push_back(Slot::Shared(BTreeSet::from([id]))),
                }
            }
            inner.reservations.insert(
                id,
                Reservation {
                    paths: paths.into_iter().collect(),
                    dirs: dirs.into_iter().collect(),
                    job: Some(Box::new(job)),
                },
            );
            let ready = inner.take_if_ready(id).map(|job| (id, job));
            log::trace!("reservation {id} queued, ready: {}", ready.is_some());
            ready
        };

        let started = ready.is_some();
        run(&self.inner, ready.into_iter().collect());
        started
    }

    /// Wait until `paths` can be reserved.
    pub async fn acquire<I, P>(&self, paths: I) -> Release
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let (tx, rx) = oneshot::channel();
        self.reserve(paths, move |release| {
            // A dropped receiver hands the reservation straight back.
            let _ = tx.send(release);
        });
        match rx.await {
            Ok(release) => release,
            // The job lives in the queue until it runs, and the queue
            // outlives this borrow.
            Err(_) => unreachable!("reservation job dropped without running"),
        }
    }

    /// Whether nothing is queued or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let inner = lock(&self.inner);
        inner.queues.is_empty() && inner.reservations.is_empty()
    }
}
