//! Friend-acceptance saga constants.

/// The saga type identifier for friend acceptance.
pub const SAGA_TYPE: &str = "FriendAcceptance";

/// Step name: transition the pending request to accepted.
pub const STEP_ACCEPT_REQUEST: &str = "accept_request";

/// Step name: insert the reciprocal friendship pair.
pub const STEP_CREATE_RELATIONSHIPS: &str = "create_relationships";

/// Step name: stage FriendAdded events into the outbox and commit.
pub const STEP_STAGE_EVENTS: &str = "stage_events";
