//! Who may see which capsule.
//!
//! A capsule is visible to its owner, to every member of the group it was
//! posted in, and to every user it was explicitly shared with. The same rule
//! exists twice: as [`can_view`] for single lookups and as [`VISIBLE_TO_USER`]
//! for list queries.

use std::collections::HashSet;

use sqlx::SqlitePool;

use crate::models::Capsule;

/// `WHERE` fragment over `capsules c`; binds the user id three times.
pub const VISIBLE_TO_USER: &str = r#"
    (c.user_id = ?
        OR c.group_id IN (SELECT group_id FROM group_members WHERE user_id = ?)
        OR c.id IN (SELECT capsule_id FROM capsule_shares WHERE shared_with = ?))
"#;

/// Groups a user belongs to and capsules shared with them.
#[derive(Debug, Default, Clone)]
pub struct Membership {
    pub groups: HashSet<String>,
    pub shared_capsules: HashSet<String>,
}

impl Membership {
    pub async fn load(db: &SqlitePool, user_id: &str) -> Result<Self, sqlx::Error> {
        let groups: Vec<(String,)> =
            sqlx::query_as("SELECT group_id FROM group_members WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(db)
                .await?;

        let shares: Vec<(String,)> =
            sqlx::query_as("SELECT capsule_id FROM capsule_shares WHERE shared_with = ?")
                .bind(user_id)
                .fetch_all(db)
                .await?;

        Ok(Self {
            groups: groups.into_iter().map(|(id,)| id).collect(),
            shared_capsules: shares.into_iter().map(|(id,)| id).collect(),
        })
    }

    pub fn is_member_of(&self, group_id: &str) -> bool {
        self.groups.contains(group_id)
    }
}

pub fn can_view(capsule: &Capsule, user_id: &str, membership: &Membership) -> bool {
    capsule.user_id == user_id
        || capsule
            .group_id
            .as_deref()
            .is_some_and(|g| membership.is_member_of(g))
        || membership.shared_capsules.contains(&capsule.id)
}

/// Owners may edit their capsules; group capsules are editable by any member.
pub fn can_edit(capsule: &Capsule, user_id: &str, membership: &Membership) -> bool {
    capsule.user_id == user_id
        || capsule
            .group_id
            .as_deref()
            .is_some_and(|g| membership.is_member_of(g))
}

pub async fn is_group_member(
    db: &SqlitePool,
    group_id: &str,
    user_id: &str,
) -> Result<bool, sqlx::Error> {
    let count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user_id)
            .fetch_one(db)
            .await?;
    Ok(count.0 > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn capsule(owner: &str, group: Option<&str>) -> Capsule {
        Capsule::new(
            owner.to_string(),
            group.map(str::to_string),
            "c".to_string(),
            "d".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn owner_always_sees_own_capsule() {
        let c = capsule("alice", None);
        assert!(can_view(&c, "alice", &Membership::default()));
        assert!(!can_view(&c, "bob", &Membership::default()));
    }

    #[test]
    fn group_members_see_group_capsules() {
        let c = capsule("alice", Some("g1"));
        let mut bob = Membership::default();
        assert!(!can_view(&c, "bob", &bob));

        bob.groups.insert("g2".to_string());
        assert!(!can_view(&c, "bob", &bob));

        bob.groups.insert("g1".to_string());
        assert!(can_view(&c, "bob", &bob));
        assert!(can_edit(&c, "bob", &bob));
    }

    #[test]
    fn share_grants_view_but_not_edit() {
        let c = capsule("alice", None);
        let mut carol = Membership::default();
        carol.shared_capsules.insert(c.id.clone());

        assert!(can_view(&c, "carol", &carol));
        assert!(!can_edit(&c, "carol", &carol));
    }
}
