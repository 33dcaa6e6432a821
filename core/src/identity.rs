use crate::types::PlayerId;

pub const LOCAL_ID_PREFIX: &str = "local-";

/// The host platform's user id when it supplied one,
/// otherwise a freshly generated local id.
pub fn resolve_player_id(platform_id: Option<&str>) -> PlayerId {
    match platform_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => {
            let id = format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::new_v4());
            log::info!("no platform identity; using {id}");
            id
        }
    }
}

pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}
