//! Inquiry polling.
//!
//! Cameras don't report changes on their own, so keeping track of a camera's
//! state means asking for it periodically.
//!
//! * [InquiryRegistry] names every inquiry a camera supports. It is built
//!   once, at start-up.
//! * [PollList] is the (editable) set of names to poll.
//! * [Poller] submits every inquiry on its [PollList] at a fixed interval.
//!
//! An inquiry is only submitted again once its previous poll has finished,
//! so a camera which stops answering never builds up a backlog of polls.
//!
//! Decoded values go to each [Inquiry]'s own callback; nothing here tracks
//! whether a value has changed.
use crate::{
    controller::ViscaController, protocol::Inquiry, socket::EntryState, Error, Handle, Result,
};
use concread::cowcell::asynch::CowCell;
use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    select,
    sync::{watch, Mutex},
    task::JoinHandle,
    time::sleep,
};

/// Named inquiries.
#[derive(Debug, Clone, Default)]
pub struct InquiryRegistry {
    inquiries: BTreeMap<String, Inquiry>,
}

impl InquiryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an inquiry, returning the one previously registered as `name`.
    pub fn register(&mut self, name: impl Into<String>, inquiry: Inquiry) -> Option<Inquiry> {
        let name = name.into();
        let old = self.inquiries.insert(name.clone(), inquiry);
        if old.is_some() {
            warn!("replaced inquiry {name}");
        }
        old
    }

    pub fn get(&self, name: &str) -> Result<&Inquiry> {
        self.inquiries.get(name).ok_or(Error::NotFound)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inquiries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inquiries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.inquiries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inquiries.is_empty()
    }
}

/// The names of the inquiries to poll.
///
/// Every name must be in the list's [InquiryRegistry].
#[derive(Debug, Clone)]
pub struct PollList {
    registry: Arc<InquiryRegistry>,
    names: BTreeSet<String>,
}

impl PollList {
    /// Creates a list which polls every inquiry in `registry`.
    pub fn new(registry: Arc<InquiryRegistry>) -> Self {
        let mut o = Self::empty(registry);
        o.reset();
        o
    }

    /// Creates an empty list.
    pub fn empty(registry: Arc<InquiryRegistry>) -> Self {
        Self {
            registry,
            names: BTreeSet::new(),
        }
    }

    pub fn registry(&self) -> &InquiryRegistry {
        &self.registry
    }

    /// Adds `name` to the list.
    ///
    /// ## Errors
    ///
    /// * [`Error::NotFound`] if `name` is not a registered inquiry
    pub fn add(&mut self, name: &str) -> Result {
        if !self.registry.contains(name) {
            debug!("cannot poll unknown inquiry {name}");
            return Err(Error::NotFound);
        }
        self.names.insert(name.to_string());
        Ok(())
    }

    /// Adds several names to the list.
    ///
    /// If any of them is not a registered inquiry, the list is left
    /// unchanged.
    pub fn add_range<I, S>(&mut self, names: I) -> Result
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|n| {
                let n = n.as_ref();
                if self.registry.contains(n) {
                    Ok(n.to_string())
                } else {
                    debug!("cannot poll unknown inquiry {n}");
                    Err(Error::NotFound)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        self.names.extend(names);
        Ok(())
    }

    /// Removes `name` from the list, returning `true` if it was there.
    pub fn remove(&mut self, name: &str) -> bool {
        self.names.remove(name)
    }

    pub fn clear(&mut self) {
        self.names.clear();
    }

    /// Puts every registered inquiry back on the list.
    pub fn reset(&mut self) {
        self.names = self.registry.names().map(str::to_string).collect();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The inquiries on the list.
    pub fn inquiries(&self) -> impl Iterator<Item = (&str, &Inquiry)> {
        self.names
            .iter()
            .filter_map(|n| Some((n.as_str(), self.registry.get(n).ok()?)))
    }
}

/// Inquiries from earlier polls which have not finished yet, by name.
#[derive(Default)]
struct Outstanding {
    polls: BTreeMap<String, watch::Receiver<EntryState>>,
}

impl Outstanding {
    fn is_busy(&self, name: &str) -> bool {
        self.polls
            .get(name)
            .is_some_and(|s| {
                let state = *s.borrow();
                // A closed channel means the engine is gone
                !state.is_terminal() && s.has_changed().is_ok()
            })
    }
}

/// Periodically submits the inquiries on a [PollList].
///
/// The list can be changed while polling; each poll works from a consistent
/// snapshot of it.
///
/// A new [Poller] starts disabled; call [`Poller::set_enabled()`] to start
/// polling. Polling stops when the [Poller] is dropped.
pub struct Poller {
    controller: ViscaController,
    list: Arc<CowCell<PollList>>,
    enabled: Arc<AtomicBool>,
    outstanding: Arc<Mutex<Outstanding>>,
    interval_tx: watch::Sender<Duration>,
    task: JoinHandle<()>,
}

impl Poller {
    /// Creates a poller which polls every `interval` once enabled.
    ///
    /// This must be called from within a tokio runtime.
    pub fn new(controller: ViscaController, list: PollList, interval: Duration) -> Self {
        let list = Arc::new(CowCell::new(list));
        let enabled = Arc::new(AtomicBool::new(false));
        let outstanding = Arc::new(Mutex::new(Outstanding::default()));
        let (interval_tx, interval_rx) = watch::channel(interval);

        debug!("Spawning poll task...");
        let task = tokio::task::spawn(poll_task(
            controller.clone(),
            list.clone(),
            enabled.clone(),
            outstanding.clone(),
            interval_rx,
        ));

        Self {
            controller,
            list,
            enabled,
            outstanding,
            interval_tx,
            task,
        }
    }

    /// Submits the inquiries on the list now.
    ///
    /// This does nothing while polling is disabled. Inquiries whose previous
    /// poll is still outstanding are skipped; handles are returned for the
    /// rest.
    pub async fn poll_now(&self) -> Result<Vec<Handle>> {
        if !self.is_enabled() {
            debug!("polling disabled, ignoring manual poll");
            return Ok(Vec::new());
        }
        poll_once(&self.controller, &self.list, &self.outstanding).await
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Changes the polling interval. This takes effect straight away.
    pub fn set_interval(&self, interval: Duration) {
        self.interval_tx.send_replace(interval);
    }

    pub fn interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    /// Gets the current list.
    pub async fn list(&self) -> impl Deref<Target = PollList> {
        self.list.read().await
    }

    /// Changes the list.
    pub async fn edit<R>(&self, f: impl FnOnce(&mut PollList) -> Result<R>) -> Result<R> {
        let mut w = self.list.write().await;
        let r = f(&mut *w)?;
        w.commit().await;
        Ok(r)
    }

    pub async fn add(&self, name: &str) -> Result {
        self.edit(|l| l.add(name)).await
    }

    pub async fn add_range<I, S>(&self, names: I) -> Result
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.edit(|l| l.add_range(names)).await
    }

    pub async fn remove(&self, name: &str) -> Result<bool> {
        self.edit(|l| Ok(l.remove(name))).await
    }

    pub async fn clear(&self) -> Result {
        self.edit(|l| {
            l.clear();
            Ok(())
        })
        .await
    }

    pub async fn reset(&self) -> Result {
        self.edit(|l| {
            l.reset();
            Ok(())
        })
        .await
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll_once(
    controller: &ViscaController,
    list: &CowCell<PollList>,
    outstanding: &Mutex<Outstanding>,
) -> Result<Vec<Handle>> {
    let list = list.read().await;
    let mut outstanding = outstanding.lock().await;
    outstanding.polls.retain(|name, _| list.contains(name));
    trace!("polling {} inquiries", list.len());

    let mut handles = Vec::new();
    for (name, inquiry) in list.inquiries() {
        if outstanding.is_busy(name) {
            trace!("{name}: previous poll still outstanding");
            continue;
        }

        let handle = controller.submit(inquiry.clone())?;
        outstanding
            .polls
            .insert(name.to_string(), handle.state_watcher());
        handles.push(handle);
    }
    Ok(handles)
}

async fn poll_task(
    controller: ViscaController,
    list: Arc<CowCell<PollList>>,
    enabled: Arc<AtomicBool>,
    outstanding: Arc<Mutex<Outstanding>>,
    mut interval_rx: watch::Receiver<Duration>,
) {
    loop {
        let interval = *interval_rx.borrow_and_update();
        select! {
            () = sleep(interval) => {
                if !enabled.load(Ordering::SeqCst) {
                    continue;
                }

                match poll_once(&controller, &list, &outstanding).await {
                    Ok(_) => (),
                    Err(Error::ChannelUnavailable) => {
                        info!("controller stopped, polling stopped");
                        return;
                    }
                    Err(e) => warn!("poll failed: {e}"),
                }
            }

            r = interval_rx.changed() => {
                if r.is_err() {
                    return;
                }
                debug!("poll interval changed to {:?}", *interval_rx.borrow());
            }
        }
    }
}
