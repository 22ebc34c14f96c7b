mod conflict;
mod error;
mod mutations;
mod queries;
mod schedule;

pub use conflict::{available_slots, classify};
pub use error::EngineError;
pub use schedule::{is_working_day, legal_slots};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::{BusinessHours, Clock};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedProviderState = Arc<RwLock<ProviderState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the shared result.
async fn wal_writer_loop(mut wal: Wal<Event>, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                // The batch is flushed before any compaction so its records
                // are part of the log the snapshot replaces.
                flush_and_respond(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal<Event>, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} records failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal<Event>, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes of a failed batch
    // never ride along with the next one.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal<Event>, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            flush_and_respond(wal, &mut batch);
        }
    }
}

/// Scheduling engine for one tenant.
///
/// Provider schedules and bookings live behind per-provider locks; services
/// and clients are a flat catalog. Every change is an [`Event`] that is made
/// durable in the WAL before it is applied in memory.
pub struct Engine {
    pub(super) providers: DashMap<Ulid, SharedProviderState>,
    pub(super) services: DashMap<Ulid, Service>,
    pub(super) clients: DashMap<Ulid, Client>,
    /// Reverse lookup: booking id → provider id.
    pub(super) booking_index: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) hours: BusinessHours,
    pub(super) clock: Arc<dyn Clock>,
    /// Serializes creation and deletion of catalog entries.
    pub(super) catalog_lock: Mutex<()>,
    /// Shared by mutations, exclusive for compaction snapshots.
    pub(super) gate: RwLock<()>,
}

/// Apply an event to one provider's state (caller holds the lock).
fn apply_to_provider(ps: &mut ProviderState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::WorkingDaySet { weekday, working, .. } => ps.template.set(*weekday, *working),
        Event::OverrideSet { date, working, .. } => {
            ps.exceptions.insert(*date, *working);
        }
        Event::OverrideCleared { date, .. } => {
            ps.exceptions.remove(date);
        }
        Event::BookingCommitted {
            id,
            provider_id,
            client_id,
            service_id,
            date,
            start,
            duration,
        } => {
            let booking = Booking {
                id: *id,
                provider_id: *provider_id,
                client_id: *client_id,
                service_id: *service_id,
                date: *date,
                start: *start,
                duration: *duration,
            };
            match ps.insert_booking(booking) {
                Ok(()) => {
                    booking_index.insert(*id, *provider_id);
                }
                Err(dup) => tracing::warn!(
                    "skipping booking {} on {}: start {} already taken",
                    dup.id,
                    dup.date,
                    dup.start
                ),
            }
        }
        Event::BookingCancelled { id, .. } => {
            ps.remove_booking(*id);
            booking_index.remove(id);
        }
        Event::ServiceDeleted { id, .. } => {
            for booking_id in ps.remove_bookings_where(|b| b.service_id == *id) {
                booking_index.remove(&booking_id);
            }
        }
        Event::ClientDeleted { id } => {
            for booking_id in ps.remove_bookings_where(|b| b.client_id == *id) {
                booking_index.remove(&booking_id);
            }
        }
        // Catalog-level events; providers are created/removed at the map level.
        Event::ProviderCreated { .. }
        | Event::ProviderDeleted { .. }
        | Event::ServiceCreated { .. }
        | Event::ServiceUpdated { .. }
        | Event::ClientRegistered { .. } => {}
    }
}

/// The provider an event belongs to, if it is provider-scoped.
fn event_provider_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::WorkingDaySet { provider_id, .. }
        | Event::OverrideSet { provider_id, .. }
        | Event::OverrideCleared { provider_id, .. }
        | Event::ServiceCreated { provider_id, .. }
        | Event::ServiceUpdated { provider_id, .. }
        | Event::ServiceDeleted { provider_id, .. }
        | Event::BookingCommitted { provider_id, .. }
        | Event::BookingCancelled { provider_id, .. } => Some(*provider_id),
        Event::ProviderCreated { id, .. } | Event::ProviderDeleted { id } => Some(*id),
        Event::ClientRegistered { .. } | Event::ClientDeleted { .. } => None,
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        hours: BusinessHours,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::<Event>::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            providers: DashMap::new(),
            services: DashMap::new(),
            clients: DashMap::new(),
            booking_index: DashMap::new(),
            wal_tx,
            notify,
            hours,
            clock,
            catalog_lock: Mutex::new(()),
            gate: RwLock::new(()),
        };

        // Replay into plain owned state; locks are only wrapped on at the end.
        let mut states: HashMap<Ulid, ProviderState> = HashMap::new();
        for event in &events {
            engine.apply_catalog(event);
            match event {
                Event::ProviderCreated { id, name, template } => {
                    states.insert(*id, ProviderState::new(*id, name.clone(), *template));
                }
                Event::ProviderDeleted { id } => {
                    if let Some(ps) = states.remove(id) {
                        engine.forget_provider(&ps);
                    }
                }
                Event::ClientDeleted { .. } => {
                    for ps in states.values_mut() {
                        apply_to_provider(ps, event, &engine.booking_index);
                    }
                }
                other => {
                    if let Some(pid) = event_provider_id(other)
                        && let Some(ps) = states.get_mut(&pid)
                    {
                        apply_to_provider(ps, other, &engine.booking_index);
                    }
                }
            }
        }
        for (id, ps) in states {
            engine.providers.insert(id, Arc::new(RwLock::new(ps)));
        }

        if !events.is_empty() {
            tracing::debug!(
                "replayed {} events: {} providers, {} services, {} clients, {} bookings",
                events.len(),
                engine.providers.len(),
                engine.services.len(),
                engine.clients.len(),
                engine.booking_index.len()
            );
        }
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Catalog-side effects of an event: services and clients.
    pub(super) fn apply_catalog(&self, event: &Event) {
        match event {
            Event::ServiceCreated {
                id,
                provider_id,
                name,
                category,
                duration,
                price,
            }
            | Event::ServiceUpdated {
                id,
                provider_id,
                name,
                category,
                duration,
                price,
            } => {
                self.services.insert(
                    *id,
                    Service {
                        id: *id,
                        provider_id: *provider_id,
                        name: name.clone(),
                        category: category.clone(),
                        duration: *duration,
                        price: *price,
                    },
                );
            }
            Event::ServiceDeleted { id, .. } => {
                self.services.remove(id);
            }
            Event::ClientRegistered { id, name } => {
                self.clients.insert(*id, Client { id: *id, name: name.clone() });
            }
            Event::ClientDeleted { id } => {
                self.clients.remove(id);
            }
            _ => {}
        }
    }

    /// Drop everything that hangs off a deleted provider.
    pub(super) fn forget_provider(&self, ps: &ProviderState) {
        for booking in ps.all_bookings() {
            self.booking_index.remove(&booking.id);
        }
        self.services.retain(|_, s| s.provider_id != ps.id);
    }

    pub fn get_provider(&self, id: &Ulid) -> Option<SharedProviderState> {
        self.providers.get(id).map(|e| e.value().clone())
    }

    pub fn get_provider_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    /// Write guard on a live provider. A provider deleted while we waited for
    /// the lock is reported as missing.
    pub(super) async fn provider_write(&self, id: Ulid) -> Result<OwnedRwLockWriteGuard<ProviderState>, EngineError> {
        let ps = self.get_provider(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ps.write_owned().await;
        if guard.retired {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    pub(super) async fn provider_read(&self, id: Ulid) -> Result<OwnedRwLockReadGuard<ProviderState>, EngineError> {
        let ps = self.get_provider(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ps.read_owned().await;
        if guard.retired {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    /// WAL-append + apply + notify for a provider-scoped event.
    pub(super) async fn persist_and_apply(&self, ps: &mut ProviderState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_catalog(event);
        apply_to_provider(ps, event, &self.booking_index);
        self.notify.send(ps.id, event);
        Ok(())
    }

    /// Change feed for one provider: every event applied to it from now on.
    pub fn subscribe(&self, provider_id: Ulid) -> broadcast::Receiver<Event> {
        self.notify.subscribe(provider_id)
    }

    pub fn hours(&self) -> &BusinessHours {
        &self.hours
    }
}
