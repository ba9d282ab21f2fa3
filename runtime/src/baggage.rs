//! Baggage side: the operations that change a bag's status.
//!
//! Every status change runs the state machine, commits the new status and its
//! outbox row together, then tries to publish right away. A failed publish
//! does not roll the status back; the row stays for the outbox dispatcher and
//! the caller learns the change is not announced yet.

use crate::publisher::{ChangePublisher, PublishError};
use baggage_tracker_core::baggage::{Baggage, InvalidBaggageError, NewBaggage};
use baggage_tracker_core::environment::Clock;
use baggage_tracker_core::event::BaggageStateChangeEvent;
use baggage_tracker_core::status::{BaggageStatus, InvalidTransitionError};
use baggage_tracker_core::store::{BaggageRepository, Outbox, StoreError};
use baggage_tracker_core::types::{BaggageId, EventId, PassengerId};
use std::sync::Arc;
use thiserror::Error;

/// Errors from [`BaggageService`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BaggageServiceError {
    /// The new bag failed validation.
    #[error(transparent)]
    InvalidBaggage(#[from] InvalidBaggageError),

    /// No bag with this id.
    #[error("Baggage {0} not found")]
    NotFound(BaggageId),

    /// The state machine refused the change. Nothing was written or published.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransitionError),

    /// Another writer changed the bag first.
    #[error("Baggage {0} was modified concurrently")]
    ConcurrentModification(BaggageId),

    /// The status change is committed but its event did not reach the bus.
    /// The outbox dispatcher will publish it later.
    #[error("Baggage {} is now {} but the change is not announced yet: {source}", .baggage.id, .baggage.status)]
    NotYetAnnounced {
        /// The committed bag
        baggage: Baggage,
        /// Why the publish failed
        #[source]
        source: PublishError,
    },

    /// Storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates bags and moves them through their lifecycle.
#[derive(Clone)]
pub struct BaggageService {
    repository: Arc<dyn BaggageRepository>,
    outbox: Arc<dyn Outbox>,
    publisher: Arc<ChangePublisher>,
    clock: Arc<dyn Clock>,
}

impl BaggageService {
    /// Wire the service to its collaborators.
    #[must_use]
    pub fn new(
        repository: Arc<dyn BaggageRepository>,
        outbox: Arc<dyn Outbox>,
        publisher: Arc<ChangePublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            outbox,
            publisher,
            clock,
        }
    }

    /// Register a new bag. It starts in `REGISTERED` and no event is published.
    ///
    /// # Errors
    ///
    /// [`BaggageServiceError::InvalidBaggage`] for a non-positive weight or
    /// passenger id; store errors otherwise.
    pub async fn create_baggage(&self, baggage: NewBaggage) -> Result<Baggage, BaggageServiceError> {
        baggage.validate()?;
        let created = self.repository.insert(baggage).await?;
        tracing::info!(
            baggage_id = %created.id,
            passenger_id = %created.passenger_id,
            weight = created.weight,
            "Baggage registered"
        );
        Ok(created)
    }

    /// Move the bag to `CHECKED_IN`.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn check_in(&self, id: BaggageId) -> Result<Baggage, BaggageServiceError> {
        self.transition(id, BaggageStatus::CheckedIn).await
    }

    /// Move the bag to `LOADED`.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn load(&self, id: BaggageId) -> Result<Baggage, BaggageServiceError> {
        self.transition(id, BaggageStatus::Loaded).await
    }

    /// Move the bag to `IN_TRANSIT`.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn depart(&self, id: BaggageId) -> Result<Baggage, BaggageServiceError> {
        self.transition(id, BaggageStatus::InTransit).await
    }

    /// Move the bag to `ARRIVED`.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn arrive(&self, id: BaggageId) -> Result<Baggage, BaggageServiceError> {
        self.transition(id, BaggageStatus::Arrived).await
    }

    /// Move the bag to `CLAIMED`.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`]. Claiming twice is an invalid transition.
    pub async fn claim_baggage(&self, id: BaggageId) -> Result<Baggage, BaggageServiceError> {
        self.transition(id, BaggageStatus::Claimed).await
    }

    /// Move the bag to `LOST`.
    ///
    /// # Errors
    ///
    /// See [`Self::transition`].
    pub async fn report_lost(&self, id: BaggageId) -> Result<Baggage, BaggageServiceError> {
        self.transition(id, BaggageStatus::Lost).await
    }

    /// Apply `requested` to the bag, commit it with its outbox row and publish.
    ///
    /// # Errors
    ///
    /// - [`BaggageServiceError::NotFound`] for an unknown id
    /// - [`BaggageServiceError::InvalidTransition`] when the lifecycle forbids
    ///   the change; nothing is written
    /// - [`BaggageServiceError::ConcurrentModification`] when the bag changed
    ///   between read and commit
    /// - [`BaggageServiceError::NotYetAnnounced`] when the change committed
    ///   but the publish failed
    #[tracing::instrument(skip(self), fields(baggage_id = %id, requested = %requested))]
    pub async fn transition(
        &self,
        id: BaggageId,
        requested: BaggageStatus,
    ) -> Result<Baggage, BaggageServiceError> {
        let current = self
            .repository
            .find(id)
            .await?
            .ok_or(BaggageServiceError::NotFound(id))?;

        let change = current.apply(requested).inspect_err(|e| {
            tracing::warn!(error = %e, "Transition rejected");
        })?;
        let event = BaggageStateChangeEvent::from_change(EventId::generate(), &change, self.clock.now());

        let updated = self
            .repository
            .commit_transition(&change, &event)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => BaggageServiceError::ConcurrentModification(id),
                StoreError::NotFound(_) => BaggageServiceError::NotFound(id),
                other => BaggageServiceError::Store(other),
            })?;
        tracing::info!(
            event_id = %event.event_id,
            previous = ?change.previous,
            new = %change.new,
            "Status committed"
        );

        match self.announce(&event).await {
            Ok(()) => Ok(updated),
            Err(source) => Err(BaggageServiceError::NotYetAnnounced {
                baggage: updated,
                source,
            }),
        }
    }

    /// Publish the bag's outbox rows oldest first, so an earlier change that
    /// is still unannounced goes out before `event`. Stops at the first failure.
    ///
    /// If the rows cannot be read nothing is published: an earlier row may be
    /// waiting and the dispatcher keeps the order.
    async fn announce(&self, event: &BaggageStateChangeEvent) -> Result<(), PublishError> {
        let pending = match self.outbox.pending_for_baggage(event.baggage_id).await {
            Ok(pending) => pending,
            Err(source) => {
                tracing::warn!(error = %source, "Outbox not readable, leaving the event to the dispatcher");
                return Err(PublishError::Deferred {
                    event_id: event.event_id,
                    source,
                });
            }
        };

        for entry in &pending {
            let event_id = entry.event.event_id;
            match self.publisher.publish(&entry.event).await {
                Ok(_) => {
                    if let Err(e) = self.outbox.remove(&event_id).await {
                        // The dispatcher will publish it again; consumers deduplicate.
                        tracing::warn!(%event_id, error = %e, "Outbox row not removed after publish");
                    }
                }
                Err(source) => {
                    if let Err(e) = self.outbox.record_failure(&event_id, &source.to_string()).await {
                        tracing::warn!(%event_id, error = %e, "Publish failure not recorded");
                    }
                    return Err(source);
                }
            }
        }
        Ok(())
    }

    /// Look a bag up.
    ///
    /// # Errors
    ///
    /// [`BaggageServiceError::NotFound`] for an unknown id; store errors otherwise.
    pub async fn find(&self, id: BaggageId) -> Result<Baggage, BaggageServiceError> {
        self.repository
            .find(id)
            .await?
            .ok_or(BaggageServiceError::NotFound(id))
    }

    /// All bags of a passenger.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn list_for_passenger(
        &self,
        passenger_id: PassengerId,
    ) -> Result<Vec<Baggage>, BaggageServiceError> {
        Ok(self.repository.list_for_passenger(passenger_id).await?)
    }
}
