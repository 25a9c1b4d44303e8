//! Campaign aggregate: lifecycle state machine, audience resolution, and
//! send materialization.

pub mod model;
pub mod service;
pub mod state_machine;

pub use model::{AudienceDescriptor, Campaign, CampaignSpec, CampaignState, ChannelSettings};
pub use service::CampaignService;
pub use state_machine::CampaignStateMachine;
