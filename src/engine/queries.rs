use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::clock;
use crate::model::*;

use super::conflict::{self, validate_duration};
use super::schedule;
use super::{Engine, EngineError};

impl Engine {
    pub async fn is_working_day(&self, provider_id: Ulid, date: NaiveDate) -> Result<bool, EngineError> {
        let guard = self.provider_read(provider_id).await?;
        Ok(schedule::is_working_day(&guard, date))
    }

    pub async fn legal_slots(&self, provider_id: Ulid, date: NaiveDate) -> Result<Vec<Minute>, EngineError> {
        let guard = self.provider_read(provider_id).await?;
        Ok(schedule::legal_slots(&guard, &self.hours, date))
    }

    /// Status of every legal start on `date` for a candidate of `duration`
    /// minutes, relative to the engine clock.
    pub async fn available_slots(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
        duration: Minute,
    ) -> Result<Vec<Slot>, EngineError> {
        self.available_slots_at(provider_id, date, duration, self.clock.now())
            .await
    }

    pub async fn available_slots_at(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
        duration: Minute,
        now: NaiveDateTime,
    ) -> Result<Vec<Slot>, EngineError> {
        validate_duration(duration)?;
        let guard = self.provider_read(provider_id).await?;
        let legal = schedule::legal_slots(&guard, &self.hours, date);
        Ok(conflict::available_slots(legal, guard.bookings_on(date), duration, date, now))
    }

    /// Availability sized by one of the provider's services.
    pub async fn available_slots_for_service(
        &self,
        provider_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, EngineError> {
        let duration = match self.services.get(&service_id) {
            Some(s) if s.provider_id == provider_id => s.duration,
            Some(_) => {
                return Err(EngineError::Validation(format!(
                    "service {service_id} is not offered by provider {provider_id}"
                )));
            }
            None => return Err(EngineError::NotFound(service_id)),
        };
        self.available_slots(provider_id, date, duration).await
    }

    /// Working status of every day of a month, for calendar views.
    pub async fn month_schedule(&self, provider_id: Ulid, year: i32, month: u32) -> Result<Vec<DaySchedule>, EngineError> {
        let days = clock::days_of_month(year, month)
            .ok_or_else(|| EngineError::Validation(format!("no such month: {year}-{month}")))?;
        let guard = self.provider_read(provider_id).await?;
        Ok(days
            .into_iter()
            .map(|date| schedule::day_schedule(&guard, date))
            .collect())
    }

    pub async fn get_template(&self, provider_id: Ulid) -> Result<WeeklyTemplate, EngineError> {
        let guard = self.provider_read(provider_id).await?;
        Ok(guard.template)
    }

    pub async fn list_providers(&self) -> Vec<ProviderInfo> {
        let shared: Vec<_> = self.providers.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for ps in shared {
            let guard = ps.read().await;
            if guard.retired {
                continue;
            }
            out.push(ProviderInfo {
                id: guard.id,
                name: guard.name.clone(),
                template: guard.template,
            });
        }
        out.sort_by_key(|p| p.id);
        out
    }

    /// All services, or only those of one provider; ordered by id.
    pub fn list_services(&self, provider_id: Option<Ulid>) -> Vec<Service> {
        let mut out: Vec<Service> = self
            .services
            .iter()
            .filter(|e| provider_id.is_none_or(|pid| e.provider_id == pid))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }

    pub fn get_service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn list_clients(&self) -> Vec<Client> {
        let mut out: Vec<Client> = self.clients.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|c| c.id);
        out
    }

    /// A provider's bookings ordered by date and start, optionally for one date.
    pub async fn bookings_for_provider(
        &self,
        provider_id: Ulid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Booking>, EngineError> {
        let guard = self.provider_read(provider_id).await?;
        Ok(match date {
            Some(d) => guard.bookings_on(d).to_vec(),
            None => guard.all_bookings().cloned().collect(),
        })
    }

    /// A client's bookings with every provider, ordered by date and start.
    pub async fn bookings_for_client(&self, client_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        if !self.clients.contains_key(&client_id) {
            return Err(EngineError::NotFound(client_id));
        }
        let shared: Vec<_> = self.providers.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for ps in shared {
            let guard = ps.read().await;
            out.extend(guard.all_bookings().filter(|b| b.client_id == client_id).cloned());
        }
        out.sort_by(|a, b| (a.date, a.start, a.id).cmp(&(b.date, b.start, b.id)));
        Ok(out)
    }
}
