use std::sync::Arc;

use tandem_store::{
  BarrierInstance, BarrierKey, BarrierPlan, BarrierState, ParticipantStatus, Store,
};
use tandem_waiter::{Coordinator, ResponseData};
use tracing::{debug, info};

use crate::error::BarrierError;

/// Message attached to participants released by an endured barrier.
pub const ENDURE_MESSAGE: &str =
  "barrier endured: a participant failed before every participant reached it";

const MAX_CAS_ATTEMPTS: usize = 64;

/// Which participant of which pipeline execution is touching a barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierScope {
  pub pipeline_execution_id: String,
  pub parallel_index: u32,
  pub pipeline_stage_element_id: String,
  pub workflow_execution_id: String,
}

impl BarrierScope {
  fn key(&self, identifier: &str) -> BarrierKey {
    BarrierKey {
      identifier: identifier.to_string(),
      pipeline_execution_id: self.pipeline_execution_id.clone(),
      parallel_index: self.parallel_index,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
  Reached,
  Failed,
}

/// Record an arrival on a standing barrier. Returns `false` when nothing
/// changed: unknown participant, a repeated arrival, or a failure already
/// recorded.
///
/// A participant that reached the barrier may still fail while it waits
/// (abort, timeout); that failure endures a standing barrier.
fn apply_arrival(barrier: &mut BarrierInstance, scope: &BarrierScope, arrival: Arrival) -> bool {
  if barrier.state.is_terminal() {
    return false;
  }
  let Some(participant) = barrier.participant_mut(&scope.pipeline_stage_element_id) else {
    return false;
  };
  let applies = match arrival {
    Arrival::Reached => participant.status == ParticipantStatus::Pending,
    Arrival::Failed => participant.status != ParticipantStatus::Failed,
  };
  if !applies {
    return false;
  }

  participant.workflow_execution_id = Some(scope.workflow_execution_id.clone());
  participant.status = match arrival {
    Arrival::Reached => ParticipantStatus::Reached,
    Arrival::Failed => ParticipantStatus::Failed,
  };

  if arrival == Arrival::Failed {
    barrier.state = BarrierState::Endure;
  } else if barrier
    .participants
    .iter()
    .all(|p| p.status == ParticipantStatus::Reached)
  {
    barrier.state = BarrierState::Down;
  }
  true
}

pub struct BarrierService {
  store: Arc<dyn Store>,
  coordinator: Coordinator,
}

impl BarrierService {
  pub fn new(store: Arc<dyn Store>, coordinator: Coordinator) -> Self {
    Self { store, coordinator }
  }

  pub async fn register_plan(&self, plan: &BarrierPlan) -> Result<(), BarrierError> {
    info!(
      pipeline_execution_id = %plan.pipeline_execution_id,
      barriers = plan.barriers.len(),
      "registered barrier plan"
    );
    Ok(self.store.save_barrier_plan(plan).await?)
  }

  /// Resolve the barrier `identifier` for `scope`, creating it from the plan
  /// on first touch. `None` when the plan does not expect this participant.
  pub async fn find(
    &self,
    identifier: &str,
    scope: &BarrierScope,
  ) -> Result<Option<BarrierInstance>, BarrierError> {
    let Some(plan) = self
      .store
      .get_barrier_plan(&scope.pipeline_execution_id)
      .await?
    else {
      return Ok(None);
    };
    let Some(planned) = plan.find(identifier, scope.parallel_index) else {
      return Ok(None);
    };
    if !planned
      .participants
      .contains(&scope.pipeline_stage_element_id)
    {
      return Ok(None);
    }

    let key = scope.key(identifier);
    if let Some(existing) = self.store.get_barrier(&key).await? {
      return Ok(Some(existing));
    }
    let created = self
      .store
      .create_barrier_if_absent(&BarrierInstance::new(key, &planned.participants))
      .await?;
    Ok(Some(created))
  }

  /// Record an arrival with a compare-and-set retry loop.
  ///
  /// Returns the barrier as it stands after the arrival, or `None` when the
  /// participant is not part of any planned barrier.
  pub async fn arrive(
    &self,
    identifier: &str,
    scope: &BarrierScope,
    arrival: Arrival,
  ) -> Result<Option<BarrierInstance>, BarrierError> {
    for attempt in 1..=MAX_CAS_ATTEMPTS {
      let Some(mut barrier) = self.find(identifier, scope).await? else {
        return Ok(None);
      };
      if !apply_arrival(&mut barrier, scope, arrival) {
        return Ok(Some(barrier));
      }

      if self.store.compare_and_set_barrier(&barrier).await? {
        barrier.version += 1;
        info!(
          barrier = %identifier,
          participant = %scope.pipeline_stage_element_id,
          state = ?barrier.state,
          ?arrival,
          "barrier arrival recorded"
        );
        if barrier.state.is_terminal() {
          self.coordinator.post_response(
            &barrier.id,
            ResponseData::Barrier {
              barrier_id: barrier.id.clone(),
              state: barrier.state,
            },
          );
        }
        return Ok(Some(barrier));
      }
      debug!(barrier = %identifier, attempt, "barrier version conflict, retrying");
    }

    Err(BarrierError::Contended {
      identifier: identifier.to_string(),
      attempts: MAX_CAS_ATTEMPTS,
    })
  }

  /// Record `scope` as failed on every standing barrier of its parallel
  /// group. Used when a workflow ends without success or is aborted, so
  /// peers waiting on the barrier are released.
  pub async fn fail_participant(&self, scope: &BarrierScope) -> Result<usize, BarrierError> {
    let Some(plan) = self
      .store
      .get_barrier_plan(&scope.pipeline_execution_id)
      .await?
    else {
      return Ok(0);
    };

    let mut failed = 0;
    for planned in plan.barriers.iter().filter(|b| {
      b.parallel_index == scope.parallel_index
        && b.participants.contains(&scope.pipeline_stage_element_id)
    }) {
      let before = self.store.get_barrier(&scope.key(&planned.identifier)).await?;
      let already_failed = before
        .as_ref()
        .and_then(|b| b.participant(&scope.pipeline_stage_element_id))
        .is_some_and(|p| p.status == ParticipantStatus::Failed);
      if already_failed || before.as_ref().is_some_and(|b| b.state.is_terminal()) {
        continue;
      }
      if self
        .arrive(&planned.identifier, scope, Arrival::Failed)
        .await?
        .is_some()
      {
        failed += 1;
      }
    }
    Ok(failed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;
  use tandem_store::{InMemoryStore, PlannedBarrier};

  fn scope(element_id: &str) -> BarrierScope {
    BarrierScope {
      pipeline_execution_id: "pipe-1".to_string(),
      parallel_index: 0,
      pipeline_stage_element_id: element_id.to_string(),
      workflow_execution_id: format!("exec-{element_id}"),
    }
  }

  async fn service(
    participants: &[&str],
  ) -> (
    BarrierService,
    tokio::sync::mpsc::UnboundedReceiver<tandem_waiter::Resumption>,
  ) {
    let (coordinator, rx) = Coordinator::new(Duration::from_secs(3600));
    let service = BarrierService::new(Arc::new(InMemoryStore::new()), coordinator);
    service
      .register_plan(&BarrierPlan {
        pipeline_execution_id: "pipe-1".to_string(),
        barriers: vec![PlannedBarrier {
          identifier: "deploy-gate".to_string(),
          parallel_index: 0,
          participants: participants.iter().map(|s| s.to_string()).collect(),
        }],
      })
      .await
      .unwrap();
    (service, rx)
  }

  #[tokio::test]
  async fn test_down_when_all_reach() {
    let (service, _rx) = service(&["a", "b", "c"]).await;

    for element in ["c", "a"] {
      let barrier = service
        .arrive("deploy-gate", &scope(element), Arrival::Reached)
        .await
        .unwrap()
        .unwrap();
      assert_eq!(barrier.state, BarrierState::Standing);
    }
    let barrier = service
      .arrive("deploy-gate", &scope("b"), Arrival::Reached)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(barrier.state, BarrierState::Down);

    let response = service.coordinator.response(&barrier.id).unwrap();
    assert!(matches!(
      response,
      ResponseData::Barrier {
        state: BarrierState::Down,
        ..
      }
    ));
  }

  #[tokio::test]
  async fn test_endure_when_failure_precedes_last_arrival() {
    let (service, _rx) = service(&["a", "b", "c"]).await;

    service
      .arrive("deploy-gate", &scope("a"), Arrival::Reached)
      .await
      .unwrap();
    let barrier = service
      .arrive("deploy-gate", &scope("b"), Arrival::Failed)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(barrier.state, BarrierState::Endure);

    // Terminal state never changes.
    let barrier = service
      .arrive("deploy-gate", &scope("c"), Arrival::Reached)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(barrier.state, BarrierState::Endure);
  }

  #[tokio::test]
  async fn test_unplanned_participant_is_noop() {
    let (service, _rx) = service(&["a", "b"]).await;
    assert!(service.find("deploy-gate", &scope("z")).await.unwrap().is_none());
    assert!(service.find("other-gate", &scope("a")).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_concurrent_arrivals_reach_down_once() {
    let (service, _rx) = service(&["a", "b", "c", "d"]).await;
    let service = Arc::new(service);

    let arrivals = ["a", "b", "c", "d"].map(|element| {
      let service = service.clone();
      tokio::spawn(async move {
        service
          .arrive("deploy-gate", &scope(element), Arrival::Reached)
          .await
          .unwrap()
          .unwrap()
      })
    });
    let results = futures::future::join_all(arrivals).await;

    let down = results
      .into_iter()
      .map(|r| r.unwrap())
      .filter(|b| b.state == BarrierState::Down)
      .count();
    assert_eq!(down, 1);

    let stored = service.find("deploy-gate", &scope("a")).await.unwrap().unwrap();
    assert_eq!(stored.state, BarrierState::Down);
    assert_eq!(stored.version, 4);
  }

  #[tokio::test]
  async fn test_fail_participant_releases_peers() {
    let (service, _rx) = service(&["a", "b"]).await;
    service
      .arrive("deploy-gate", &scope("a"), Arrival::Reached)
      .await
      .unwrap();

    assert_eq!(service.fail_participant(&scope("b")).await.unwrap(), 1);
    let stored = service.find("deploy-gate", &scope("a")).await.unwrap().unwrap();
    assert_eq!(stored.state, BarrierState::Endure);

    // Nothing left to fail.
    assert_eq!(service.fail_participant(&scope("b")).await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_reached_participant_failing_endures_barrier() {
    let (service, _rx) = service(&["a", "b"]).await;
    service
      .arrive("deploy-gate", &scope("a"), Arrival::Reached)
      .await
      .unwrap();

    // `a` times out while waiting at the gate.
    let barrier = service
      .arrive("deploy-gate", &scope("a"), Arrival::Failed)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(barrier.state, BarrierState::Endure);
    assert_eq!(
      barrier.participant("a").unwrap().status,
      ParticipantStatus::Failed
    );

    let barrier = service
      .arrive("deploy-gate", &scope("b"), Arrival::Reached)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(barrier.state, BarrierState::Endure);

    let response = service.coordinator.response(&barrier.id).unwrap();
    assert!(matches!(
      response,
      ResponseData::Barrier {
        state: BarrierState::Endure,
        ..
      }
    ));
  }

  #[tokio::test]
  async fn test_fail_participant_after_reaching() {
    let (service, _rx) = service(&["a", "b"]).await;
    service
      .arrive("deploy-gate", &scope("a"), Arrival::Reached)
      .await
      .unwrap();

    assert_eq!(service.fail_participant(&scope("a")).await.unwrap(), 1);
    let stored = service.find("deploy-gate", &scope("b")).await.unwrap().unwrap();
    assert_eq!(stored.state, BarrierState::Endure);

    let barrier = service
      .arrive("deploy-gate", &scope("b"), Arrival::Reached)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(barrier.state, BarrierState::Endure);
  }

  #[tokio::test]
  async fn test_repeated_reached_is_noop() {
    let (service, _rx) = service(&["a", "b"]).await;
    for _ in 0..2 {
      service
        .arrive("deploy-gate", &scope("a"), Arrival::Reached)
        .await
        .unwrap();
    }
    let stored = service.find("deploy-gate", &scope("a")).await.unwrap().unwrap();
    assert_eq!(stored.state, BarrierState::Standing);
    assert_eq!(stored.version, 1);
  }
}
