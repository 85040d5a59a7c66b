use crate::credential::Credential;

/// Ids of every credential whose `can_recover()` currently holds.
///
/// Pulled out of `manager::actor` so the selection rule can be unit-tested without standing up
/// an actor.
pub fn recoverable_ids(credentials: &[Credential]) -> Vec<String> {
    credentials
        .iter()
        .filter(|c| c.can_recover())
        .map(|c| c.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn only_recoverable_credentials_are_selected() {
        let mut banned = Credential::new_oauth("banned", "file");
        banned.auto_banned = true;
        banned.ban_until = Some(Utc::now() - Duration::seconds(1));

        let mut still_banned = Credential::new_oauth("still-banned", "file");
        still_banned.auto_banned = true;
        still_banned.ban_until = Some(Utc::now() + Duration::minutes(5));

        let healthy = Credential::new_oauth("healthy", "file");

        let ids = recoverable_ids(&[banned, still_banned, healthy]);
        assert_eq!(ids, vec!["banned".to_string()]);
    }
}
