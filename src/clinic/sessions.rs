use std::collections::HashMap;

use teloxide::types::ChatId;
use tokio::sync::Mutex;

use super::controller::{GameController, GameState};

/// Game sessions keyed by chat. Every transition runs inside `update`, so a
/// late case delivery and a player's command can never interleave.
#[derive(Default)]
pub struct Sessions {
    chats: Mutex<HashMap<ChatId, GameController>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update<R>(
        &self,
        chat: ChatId,
        apply: impl FnOnce(&mut GameController) -> R,
    ) -> R {
        let mut chats = self.chats.lock().await;
        apply(chats.entry(chat).or_default())
    }

    pub async fn snapshot(&self, chat: ChatId) -> GameController {
        self.update(chat, |controller| controller.clone()).await
    }

    pub async fn state(&self, chat: ChatId) -> GameState {
        self.update(chat, |controller| controller.state()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clinic::controller::LoadOutcome;
    use crate::clinic::provider::fallback_case;
    use std::sync::Arc;

    const CHAT: ChatId = ChatId(42);

    fn case_for(patient: &str) -> crate::clinic::Case {
        let mut case = fallback_case();
        case.patient_name = patient.to_string();
        case
    }

    #[tokio::test]
    async fn unknown_chat_starts_in_the_menu() {
        let sessions = Sessions::new();
        assert_eq!(sessions.state(CHAT).await, GameState::Menu);
    }

    #[tokio::test]
    async fn late_delivery_after_restart_keeps_the_newer_request() {
        let sessions = Sessions::new();
        let first = sessions.update(CHAT, |c| c.start()).await.unwrap();

        sessions.update(CHAT, GameController::abandon).await;
        let second = sessions.update(CHAT, |c| c.start()).await.unwrap();

        let outcome = sessions
            .update(CHAT, |c| c.finish_loading(first, Ok(case_for("旧病人"))))
            .await;
        assert_eq!(outcome, LoadOutcome::Stale);
        assert_eq!(sessions.state(CHAT).await, GameState::Loading);

        let outcome = sessions
            .update(CHAT, |c| c.finish_loading(second, Ok(case_for("新病人"))))
            .await;
        assert_eq!(outcome, LoadOutcome::Adopted);

        let controller = sessions.snapshot(CHAT).await;
        assert_eq!(controller.case().unwrap().patient_name, "新病人");
    }

    #[tokio::test]
    async fn concurrent_deliveries_only_adopt_the_outstanding_request() {
        let sessions = Arc::new(Sessions::new());
        let stale = sessions.update(CHAT, |c| c.start()).await.unwrap();
        sessions.update(CHAT, GameController::abandon).await;
        let current = sessions.update(CHAT, |c| c.start()).await.unwrap();

        let deliveries = [(stale, "旧病人"), (current, "新病人")].map(|(token, patient)| {
            let sessions = sessions.clone();
            tokio::spawn(async move {
                sessions
                    .update(CHAT, |c| c.finish_loading(token, Ok(case_for(patient))))
                    .await
            })
        });
        let mut outcomes = Vec::new();
        for delivery in deliveries {
            outcomes.push(delivery.await.unwrap());
        }

        assert_eq!(outcomes, vec![LoadOutcome::Stale, LoadOutcome::Adopted]);
        let controller = sessions.snapshot(CHAT).await;
        assert_eq!(controller.state(), GameState::Playing);
        assert_eq!(controller.case().unwrap().patient_name, "新病人");
    }

    #[tokio::test]
    async fn chats_do_not_share_sessions() {
        let sessions = Sessions::new();
        sessions.update(CHAT, |c| c.start()).await;
        assert_eq!(sessions.state(CHAT).await, GameState::Loading);
        assert_eq!(sessions.state(ChatId(7)).await, GameState::Menu);
    }
}
