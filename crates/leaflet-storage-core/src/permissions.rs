//! Map permission rules
//!
//! Every rule takes the requesting user (if authenticated) and whether the
//! request carries a valid anonymous-ownership cookie for the map; cookie
//! verification itself lives in [`crate::signing`].

use leaflet_storage_types::{EditStatus, Map, PermissionsUpdate, UserId};

/// Why a request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denied {
    /// The map has an owner and the request is anonymous: logging in may help
    LoginRequired,
    /// Logging in would not change the answer
    Forbidden,
}

pub fn can_edit(
    map: &Map,
    user: Option<UserId>,
    anonymous_owner: bool,
    allow_anonymous: bool,
) -> bool {
    if map.owner_id.is_none() && allow_anonymous && anonymous_owner {
        return true;
    }
    if map.edit_status == EditStatus::Anonymous {
        return true;
    }
    if user.is_none() {
        return false;
    }
    if map.is_owner(user) {
        return true;
    }
    map.edit_status == EditStatus::Editors && map.is_editor(user)
}

pub fn can_view(map: &Map, user: Option<UserId>) -> bool {
    use leaflet_storage_types::ShareStatus;

    if map.owner_id.is_none() {
        return true;
    }
    match map.share_status {
        ShareStatus::Public | ShareStatus::Open => true,
        ShareStatus::Private => map.is_owner(user) || map.is_editor(user),
    }
}

/// Gate applied before any map-mutating operation.
///
/// Maps everyone can edit are never gated here; callers that need more (delete,
/// clone) apply their own rule on top.
pub fn check_edit(
    map: &Map,
    user: Option<UserId>,
    anonymous_owner: bool,
    allow_anonymous: bool,
) -> Result<(), Denied> {
    if map.edit_status >= EditStatus::Editors
        && !can_edit(map, user, anonymous_owner, allow_anonymous)
    {
        if map.owner_id.is_some() && user.is_none() {
            return Err(Denied::LoginRequired);
        }
        return Err(Denied::Forbidden);
    }
    Ok(())
}

pub fn can_delete(map: &Map, user: Option<UserId>, anonymous_owner: bool) -> bool {
    match map.owner_id {
        Some(_) => map.is_owner(user),
        None => anonymous_owner,
    }
}

/// Check which fields of a permissions update the requester may change.
///
/// Returns a human readable reason when the update touches a field the
/// requester has no right to.
pub fn check_permissions_update(
    map: &Map,
    user: Option<UserId>,
    update: &PermissionsUpdate,
) -> Result<(), &'static str> {
    if map.owner_id.is_none() {
        if update.editors.is_some() || update.owner.is_some() || update.share_status.is_some() {
            return Err("Anonymous maps only support the edit status.");
        }
        return match update.edit_status {
            None | Some(EditStatus::Anonymous) | Some(EditStatus::Owner) => Ok(()),
            Some(EditStatus::Editors) => Err("Anonymous maps have no editors."),
        };
    }
    if !map.is_owner(user)
        && (update.edit_status.is_some() || update.share_status.is_some() || update.owner.is_some())
    {
        return Err("Only the owner can change edit status, share status or owner.");
    }
    Ok(())
}
