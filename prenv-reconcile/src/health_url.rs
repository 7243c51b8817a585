//! Health-check URL templating.

use prenv_core::ChangeRequest;

pub const PR_NUMBER_PLACEHOLDER: &str = "<<PR_NUMBER>>";
pub const PR_HEAD_SHA_PLACEHOLDER: &str = "<<PR_HEAD_SHA>>";

/// Substitute every placeholder occurrence. Unknown `<<...>>` tokens are left
/// as they are.
pub fn render(template: &str, cr: &ChangeRequest) -> String {
    template
        .replace(PR_NUMBER_PLACEHOLDER, &cr.id.to_string())
        .replace(PR_HEAD_SHA_PLACEHOLDER, &cr.head_sha.0)
}
