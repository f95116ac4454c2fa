use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::store::StoreError;

use super::conflict::{validate_exception, validate_rule, validate_tour};
use super::{Engine, EngineError};

impl Engine {
    pub async fn create_tour(&self, tour: Tour) -> Result<Tour, EngineError> {
        validate_tour(&tour)?;
        let _section = self.enter_tour(tour.id).await?;
        if self.bounded(self.rules.get_tour(tour.id)).await?.is_some() {
            return Err(EngineError::AlreadyExists(tour.id.to_string()));
        }
        self.bounded(self.rules.put_tour(tour.clone())).await?;
        self.cache.invalidate(tour.id);
        info!(tour = %tour.id, title = %tour.title, "tour created");
        Ok(tour)
    }

    pub async fn update_tour(&self, tour: Tour) -> Result<Tour, EngineError> {
        validate_tour(&tour)?;
        let _section = self.enter_tour(tour.id).await?;
        self.require_tour(tour.id).await?;
        self.bounded(self.rules.put_tour(tour.clone())).await?;
        self.cache.invalidate(tour.id);
        info!(tour = %tour.id, active = tour.active, "tour updated");
        Ok(tour)
    }

    /// Removes the tour with its rules, exceptions, reservations and payments.
    pub async fn delete_tour(&self, tour_id: Ulid) -> Result<(), EngineError> {
        let section = self.enter_tour(tour_id).await?;
        match self.timed(self.rules.delete_tour(tour_id)).await? {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => return Err(EngineError::TourNotFound(tour_id)),
            Err(e) => return Err(e.into()),
        }
        self.cache.invalidate(tour_id);
        drop(section);
        info!(tour = %tour_id, "tour deleted");
        Ok(())
    }

    pub async fn get_tour(&self, tour_id: Ulid) -> Result<Tour, EngineError> {
        self.require_tour(tour_id).await
    }

    pub(super) async fn require_tour(&self, tour_id: Ulid) -> Result<Tour, EngineError> {
        self.bounded(self.rules.get_tour(tour_id))
            .await?
            .ok_or(EngineError::TourNotFound(tour_id))
    }

    pub async fn add_rule(&self, rule: AvailabilityRule) -> Result<AvailabilityRule, EngineError> {
        validate_rule(&rule)?;
        let _section = self.enter_tour(rule.tour_id).await?;
        self.require_tour(rule.tour_id).await?;
        if self.bounded(self.rules.get_rule(rule.id)).await?.is_some() {
            return Err(EngineError::AlreadyExists(rule.id.to_string()));
        }
        self.bounded(self.rules.put_rule(rule.clone())).await?;
        self.cache.invalidate(rule.tour_id);
        info!(rule = %rule.id, tour = %rule.tour_id, "rule added");
        Ok(rule)
    }

    /// Replace a rule. A rule cannot move to another tour.
    pub async fn update_rule(&self, rule: AvailabilityRule) -> Result<AvailabilityRule, EngineError> {
        validate_rule(&rule)?;
        let _section = self.enter_tour(rule.tour_id).await?;
        let existing = self
            .bounded(self.rules.get_rule(rule.id))
            .await?
            .ok_or(EngineError::RuleNotFound(rule.id))?;
        if existing.tour_id != rule.tour_id {
            return Err(EngineError::InvalidCatalog("rule belongs to another tour"));
        }
        self.bounded(self.rules.put_rule(rule.clone())).await?;
        self.cache.invalidate(rule.tour_id);
        info!(rule = %rule.id, tour = %rule.tour_id, "rule updated");
        Ok(rule)
    }

    /// Soft delete: the rule stays but stops producing slots.
    pub async fn deactivate_rule(&self, rule_id: Ulid) -> Result<AvailabilityRule, EngineError> {
        let rule = self
            .bounded(self.rules.get_rule(rule_id))
            .await?
            .ok_or(EngineError::RuleNotFound(rule_id))?;
        let _section = self.enter_tour(rule.tour_id).await?;
        let rule = AvailabilityRule {
            active: false,
            ..rule
        };
        self.bounded(self.rules.put_rule(rule.clone())).await?;
        self.cache.invalidate(rule.tour_id);
        info!(rule = %rule.id, tour = %rule.tour_id, "rule deactivated");
        Ok(rule)
    }

    pub async fn rules_for_tour(&self, tour_id: Ulid) -> Result<Vec<AvailabilityRule>, EngineError> {
        self.require_tour(tour_id).await?;
        self.bounded(self.rules.list_rules(tour_id)).await
    }

    pub async fn add_exception(
        &self,
        exception: AvailabilityException,
    ) -> Result<AvailabilityException, EngineError> {
        validate_exception(&exception)?;
        let _section = self.enter_tour(exception.tour_id).await?;
        self.require_tour(exception.tour_id).await?;
        self.bounded(self.rules.put_exception(exception.clone()))
            .await?;
        self.cache.invalidate(exception.tour_id);
        info!(
            exception = %exception.id,
            tour = %exception.tour_id,
            reason = %exception.reason,
            "blackout added"
        );
        Ok(exception)
    }

    /// Move or re-word a blackout. It stays on its tour.
    pub async fn update_exception(
        &self,
        exception_id: Ulid,
        span: Span,
        reason: String,
    ) -> Result<AvailabilityException, EngineError> {
        let tour_id = self
            .bounded(self.rules.get_exception(exception_id))
            .await?
            .ok_or(EngineError::ExceptionNotFound(exception_id))?
            .tour_id;
        let exception = AvailabilityException {
            id: exception_id,
            tour_id,
            span,
            reason,
        };
        validate_exception(&exception)?;

        let _section = self.enter_tour(tour_id).await?;
        // Removed while we waited for the section.
        if self.bounded(self.rules.get_exception(exception_id)).await?.is_none() {
            return Err(EngineError::ExceptionNotFound(exception_id));
        }
        self.bounded(self.rules.put_exception(exception.clone()))
            .await?;
        self.cache.invalidate(tour_id);
        info!(exception = %exception_id, tour = %tour_id, "blackout updated");
        Ok(exception)
    }

    pub async fn remove_exception(&self, exception_id: Ulid) -> Result<(), EngineError> {
        let tour_id = match self.timed(self.rules.remove_exception(exception_id)).await? {
            Ok(tour_id) => tour_id,
            Err(StoreError::NotFound(_)) => return Err(EngineError::ExceptionNotFound(exception_id)),
            Err(e) => return Err(e.into()),
        };
        self.cache.invalidate(tour_id);
        info!(exception = %exception_id, tour = %tour_id, "blackout removed");
        Ok(())
    }

    pub async fn exceptions_for_tour(
        &self,
        tour_id: Ulid,
    ) -> Result<Vec<AvailabilityException>, EngineError> {
        self.require_tour(tour_id).await?;
        self.bounded(self.rules.list_exceptions(tour_id)).await
    }
}
