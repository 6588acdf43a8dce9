use crate::auth::AuthUser;
use crate::security::RequestMeta;

/// Records a user-initiated job action on the `audit` log target.
pub fn record(meta: &RequestMeta, user: &AuthUser, action: &str, target: &str, outcome: &str) {
    tracing::info!(
        target: "audit",
        request_id = %meta.request_id,
        user = %user.email,
        action,
        target_job = target,
        outcome,
        "job action"
    );
}
