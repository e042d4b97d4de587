//! Demo accounts for local development.

use necho_realtime::{MemoryStore, User};
use necho_types::Result;

/// A seeded user and the bearer token issued for it.
#[derive(Debug, Clone)]
pub struct DemoAccount {
    pub user: User,
    pub token: String,
}

/// Create `usernames` (skipping ones that already exist), issue each a token
/// and, with `shared_chat`, put them all in one chat named "general".
pub fn seed(
    store: &MemoryStore,
    usernames: &[String],
    shared_chat: bool,
) -> Result<Vec<DemoAccount>> {
    let mut accounts = Vec::with_capacity(usernames.len());
    for username in usernames {
        let user = match store.get_user_by_username(username) {
            Some(user) => user,
            None => store.create_user(username.clone())?,
        };
        let token = store.issue_token(&user.id)?;
        accounts.push(DemoAccount { user, token });
    }

    if shared_chat && !accounts.is_empty() {
        let participants = accounts.iter().map(|a| a.user.id.clone());
        let chat = store.create_chat(Some("general".to_string()), participants)?;
        tracing::info!(chat_id = %chat.id, members = accounts.len(), "Seeded demo chat");
    }

    Ok(accounts)
}
