use crate::model::CampaignState;
use outreach_core::{OutreachError, OutreachResult};
use serde::{Deserialize, Serialize};

/// Describes a single valid campaign lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CampaignState,
    pub to: CampaignState,
    pub trigger: String,
}

/// Guards the campaign lifecycle by enforcing the finite transition set.
/// `draft` is initial; `completed` and `cancelled` are terminal. The only
/// backward edge is `paused -> sending`.
#[derive(Debug, Clone)]
pub struct CampaignStateMachine {
    transitions: Vec<StateTransition>,
}

impl CampaignStateMachine {
    pub fn new() -> Self {
        let edge = |from, to, trigger: &str| StateTransition {
            from,
            to,
            trigger: trigger.to_string(),
        };
        let transitions = vec![
            edge(CampaignState::Draft, CampaignState::Scheduled, "schedule"),
            edge(CampaignState::Draft, CampaignState::Sending, "start"),
            edge(CampaignState::Scheduled, CampaignState::Sending, "start"),
            edge(CampaignState::Paused, CampaignState::Sending, "resume"),
            edge(CampaignState::Sending, CampaignState::Paused, "pause"),
            edge(
                CampaignState::Sending,
                CampaignState::Completed,
                "all_sends_terminal",
            ),
            edge(CampaignState::Draft, CampaignState::Cancelled, "cancel"),
            edge(CampaignState::Scheduled, CampaignState::Cancelled, "cancel"),
            edge(CampaignState::Sending, CampaignState::Cancelled, "cancel"),
            edge(CampaignState::Paused, CampaignState::Cancelled, "cancel"),
        ];
        Self { transitions }
    }

    pub fn can_transition(&self, from: CampaignState, to: CampaignState) -> bool {
        // Terminal states have no outgoing edges, table or not.
        !from.is_terminal()
            && self
                .transitions
                .iter()
                .any(|t| t.from == from && t.to == to)
    }

    /// Validate and return the new state, or `InvalidState` if the edge
    /// does not exist.
    pub fn transition(
        &self,
        from: CampaignState,
        to: CampaignState,
    ) -> OutreachResult<CampaignState> {
        if self.can_transition(from, to) {
            Ok(to)
        } else {
            Err(OutreachError::InvalidState(format!(
                "campaign cannot move from {from:?} to {to:?}"
            )))
        }
    }
}

impl Default for CampaignStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
