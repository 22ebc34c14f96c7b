use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::clock;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_candidate, validate_duration};
use super::schedule::{inverse_of_template, is_working_day, legal_slots};
use super::{apply_to_provider, Engine, EngineError, WalCommand};

fn validate_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation(format!("{what} must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_weekday(weekday: u8) -> Result<(), EngineError> {
    if weekday > 6 {
        return Err(EngineError::Validation(format!("weekday must be 0..=6, got {weekday}")));
    }
    Ok(())
}

fn validate_service(name: &str, category: Option<&str>, duration: Minute, price: i64) -> Result<(), EngineError> {
    validate_name(name, "service name")?;
    if let Some(c) = category {
        validate_name(c, "category")?;
    }
    validate_duration(duration)?;
    if price <= 0 {
        return Err(EngineError::Validation(format!("price must be positive, got {price}")));
    }
    if price > MAX_PRICE {
        return Err(EngineError::LimitExceeded("price too high"));
    }
    Ok(())
}

impl Engine {
    // ── Providers ────────────────────────────────────────────

    /// Register a provider with the default Mon–Fri template.
    pub async fn create_provider(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if let Some(n) = &name {
            validate_name(n, "provider name")?;
        }
        let _catalog = self.catalog_lock.lock().await;
        let _gate = self.gate.read().await;
        if self.providers.len() >= MAX_PROVIDERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many providers"));
        }
        if self.providers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let template = WeeklyTemplate::default();
        let event = Event::ProviderCreated {
            id,
            name: name.clone(),
            template,
        };
        self.wal_append(&event).await?;
        let ps = ProviderState::new(id, name, template);
        self.providers.insert(id, Arc::new(RwLock::new(ps)));
        self.notify.send(id, &event);
        tracing::info!("provider {id} created");
        Ok(())
    }

    /// Delete a provider together with its services and bookings.
    pub async fn delete_provider(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let _gate = self.gate.read().await;
        let mut guard = self.provider_write(id).await?;

        let event = Event::ProviderDeleted { id };
        self.wal_append(&event).await?;
        guard.retired = true;
        self.forget_provider(&guard);
        self.providers.remove(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        tracing::info!("provider {id} deleted with {} bookings", guard.booking_count());
        Ok(())
    }

    // ── Schedule ─────────────────────────────────────────────

    pub async fn set_working_day(&self, provider_id: Ulid, weekday: u8, working: bool) -> Result<(), EngineError> {
        validate_weekday(weekday)?;
        let _gate = self.gate.read().await;
        let mut guard = self.provider_write(provider_id).await?;
        let event = Event::WorkingDaySet {
            provider_id,
            weekday,
            working,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Upsert the exception for `date`. Existing bookings on that date are kept.
    pub async fn set_date_override(&self, provider_id: Ulid, date: NaiveDate, working: bool) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let mut guard = self.provider_write(provider_id).await?;
        let event = Event::OverrideSet {
            provider_id,
            date,
            working,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Remove the exception for `date`. Returns false if there was none.
    pub async fn clear_date_override(&self, provider_id: Ulid, date: NaiveDate) -> Result<bool, EngineError> {
        let _gate = self.gate.read().await;
        let mut guard = self.provider_write(provider_id).await?;
        if !guard.exceptions.contains_key(&date) {
            return Ok(false);
        }
        let event = Event::OverrideCleared { provider_id, date };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    /// Remove the exception if present, else create one inverting the
    /// template. Returns the effective working status afterwards.
    pub async fn toggle_date_override(&self, provider_id: Ulid, date: NaiveDate) -> Result<bool, EngineError> {
        let _gate = self.gate.read().await;
        let mut guard = self.provider_write(provider_id).await?;
        let event = if guard.exceptions.contains_key(&date) {
            Event::OverrideCleared { provider_id, date }
        } else {
            Event::OverrideSet {
                provider_id,
                date,
                working: inverse_of_template(&guard, date),
            }
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(is_working_day(&guard, date))
    }

    // ── Services ─────────────────────────────────────────────

    pub async fn create_service(
        &self,
        id: Ulid,
        provider_id: Ulid,
        name: String,
        category: Option<String>,
        duration: Minute,
        price: i64,
    ) -> Result<(), EngineError> {
        validate_service(&name, category.as_deref(), duration, price)?;
        let _catalog = self.catalog_lock.lock().await;
        let _gate = self.gate.read().await;
        if self.services.len() >= MAX_SERVICES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        if self.services.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let mut guard = self.provider_write(provider_id).await?;
        let event = Event::ServiceCreated {
            id,
            provider_id,
            name,
            category,
            duration,
            price,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Replace a service's attributes. Existing bookings keep the duration
    /// they were committed with.
    pub async fn update_service(
        &self,
        id: Ulid,
        name: String,
        category: Option<String>,
        duration: Minute,
        price: i64,
    ) -> Result<(), EngineError> {
        validate_service(&name, category.as_deref(), duration, price)?;
        let _catalog = self.catalog_lock.lock().await;
        let _gate = self.gate.read().await;
        let provider_id = self
            .services
            .get(&id)
            .map(|s| s.provider_id)
            .ok_or(EngineError::NotFound(id))?;
        let mut guard = self.provider_write(provider_id).await?;
        let event = Event::ServiceUpdated {
            id,
            provider_id,
            name,
            category,
            duration,
            price,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Delete a service and every booking made for it.
    pub async fn delete_service(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let _gate = self.gate.read().await;
        let provider_id = self
            .services
            .get(&id)
            .map(|s| s.provider_id)
            .ok_or(EngineError::NotFound(id))?;
        let mut guard = self.provider_write(provider_id).await?;
        let event = Event::ServiceDeleted { id, provider_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Clients ──────────────────────────────────────────────

    pub async fn register_client(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if let Some(n) = &name {
            validate_name(n, "client name")?;
        }
        let _catalog = self.catalog_lock.lock().await;
        let _gate = self.gate.read().await;
        if self.clients.len() >= MAX_CLIENTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many clients"));
        }
        if self.clients.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::ClientRegistered { id, name };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(())
    }

    /// Delete a client and their bookings with every provider. Returns the
    /// number of bookings removed.
    pub async fn delete_client(&self, id: Ulid) -> Result<usize, EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let _gate = self.gate.read().await;
        if !self.clients.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut provider_ids: Vec<Ulid> = self.providers.iter().map(|e| *e.key()).collect();
        provider_ids.sort();
        let mut guards = Vec::with_capacity(provider_ids.len());
        for pid in provider_ids {
            if let Some(ps) = self.get_provider(&pid) {
                let guard = ps.write_owned().await;
                if !guard.retired {
                    guards.push(guard);
                }
            }
        }

        let event = Event::ClientDeleted { id };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        let mut removed = 0;
        for guard in guards.iter_mut() {
            let before = guard.booking_count();
            apply_to_provider(guard, &event, &self.booking_index);
            if guard.booking_count() != before {
                removed += before - guard.booking_count();
                self.notify.send(guard.id, &event);
            }
        }
        tracing::info!("client {id} deleted with {removed} bookings");
        Ok(removed)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Re-validate `start` against the provider's current schedule and
    /// bookings, then durably insert the booking. Validation, WAL append and
    /// insert all happen under the provider's write lock, so of two commits
    /// racing for overlapping times exactly one wins.
    pub async fn commit_booking(
        &self,
        id: Ulid,
        provider_id: Ulid,
        client_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Booking, EngineError> {
        let result = self
            .commit_booking_inner(id, provider_id, client_id, service_id, date, time)
            .await;
        match &result {
            Ok(b) => {
                metrics::counter!(observability::BOOKINGS_COMMITTED_TOTAL).increment(1);
                tracing::debug!("booking {} committed: {} {} +{}m", b.id, b.date, clock::format_minute(b.start), b.duration);
            }
            Err(e) => {
                metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => e.reason()).increment(1);
                tracing::debug!("booking {id} for provider {provider_id} rejected: {e}");
            }
        }
        result
    }

    async fn commit_booking_inner(
        &self,
        id: Ulid,
        provider_id: Ulid,
        client_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Booking, EngineError> {
        let start = clock::minute_of(time)?;
        let _gate = self.gate.read().await;
        let mut guard = self.provider_write(provider_id).await?;

        // Catalog lookups happen under the lock: client and service deletion
        // both take this provider's lock before cascading.
        if self.booking_index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !self.clients.contains_key(&client_id) {
            return Err(EngineError::NotFound(client_id));
        }
        let duration = match self.services.get(&service_id) {
            Some(s) if s.provider_id == provider_id => s.duration,
            Some(_) => {
                return Err(EngineError::Validation(format!(
                    "service {service_id} is not offered by provider {provider_id}"
                )));
            }
            None => return Err(EngineError::NotFound(service_id)),
        };

        if !is_working_day(&guard, date) {
            return Err(EngineError::DayOff(date));
        }
        if !self.hours.is_on_grid(start) {
            return Err(EngineError::Validation(format!(
                "{} is not a bookable slot",
                clock::format_minute(start)
            )));
        }
        let legal = legal_slots(&guard, &self.hours, date);
        let day = guard.bookings_on(date);
        check_candidate(&legal, day, start, duration, date, self.clock.now())?;
        if day.len() >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on this date"));
        }
        // Storage-level uniqueness key, independent of interval checks.
        if guard.has_start(date, start) {
            return Err(EngineError::Conflict {
                status: SlotStatus::ForwardConflict,
                booking: day.iter().find(|b| b.start == start).map(|b| b.id),
            });
        }

        let event = Event::BookingCommitted {
            id,
            provider_id,
            client_id,
            service_id,
            date,
            start,
            duration,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(Booking {
            id,
            provider_id,
            client_id,
            service_id,
            date,
            start,
            duration,
        })
    }

    /// Cancel a booking. Returns the provider it belonged to.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.gate.read().await;
        let provider_id = self.get_provider_for_booking(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = self.provider_write(provider_id).await?;
        // Cascades may have removed it while we waited for the lock.
        if !guard.all_bookings().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BookingCancelled { id, provider_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(provider_id)
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.gate.write().await;

        let mut provider_ids: Vec<Ulid> = self.providers.iter().map(|e| *e.key()).collect();
        provider_ids.sort();
        let mut states = Vec::with_capacity(provider_ids.len());
        for pid in &provider_ids {
            if let Some(ps) = self.get_provider(pid) {
                states.push(ps.read_owned().await);
            }
        }

        let mut events = Vec::new();
        for ps in &states {
            events.push(Event::ProviderCreated {
                id: ps.id,
                name: ps.name.clone(),
                template: ps.template,
            });
        }

        let mut clients: Vec<Client> = self.clients.iter().map(|e| e.value().clone()).collect();
        clients.sort_by_key(|c| c.id);
        events.extend(clients.into_iter().map(|c| Event::ClientRegistered { id: c.id, name: c.name }));

        let mut services: Vec<Service> = self.services.iter().map(|e| e.value().clone()).collect();
        services.sort_by_key(|s| s.id);
        events.extend(services.into_iter().map(|s| Event::ServiceCreated {
            id: s.id,
            provider_id: s.provider_id,
            name: s.name,
            category: s.category,
            duration: s.duration,
            price: s.price,
        }));

        for ps in &states {
            for (date, working) in &ps.exceptions {
                events.push(Event::OverrideSet {
                    provider_id: ps.id,
                    date: *date,
                    working: *working,
                });
            }
            for b in ps.all_bookings() {
                events.push(Event::BookingCommitted {
                    id: b.id,
                    provider_id: b.provider_id,
                    client_id: b.client_id,
                    service_id: b.service_id,
                    date: b.date,
                    start: b.start,
                    duration: b.duration,
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        tracing::debug!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
