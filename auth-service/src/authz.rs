use crate::session::SessionSnapshot;

/// Explicit authorization check for boundary layers: allow when the cached
/// session carries one of `required_roles` (if any are named) and every one
/// of `required_permissions`. No session means deny.
pub fn is_allowed(
    session: Option<&SessionSnapshot>,
    required_roles: &[&str],
    required_permissions: &[&str],
) -> bool {
    let Some(session) = session else {
        return false;
    };

    if !required_roles.is_empty() && !required_roles.iter().any(|role| session.role == *role) {
        return false;
    }

    required_permissions
        .iter()
        .all(|needed| session.permissions.iter().any(|held| held == needed))
}
