//! Проверка членства пользователя в целевом канале через Bot API.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatMemberKind;
use teloxide::{ApiError, RequestError};

/// Ответ на один запрос членства. Между проходами сверки не кешируется.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// Участник, администратор, владелец или ограниченный, но присутствующий.
    Member,
    NotMember,
    /// Запрос не удался; ни одно из состояний утверждать нельзя.
    Unknown,
}

#[async_trait]
pub trait MembershipGateway: Send + Sync {
    async fn membership(&self, user_id: i64) -> Membership;
}

#[derive(Clone)]
pub struct TelegramMembership {
    bot: Bot,
    channel: ChatId,
}

impl TelegramMembership {
    pub fn new(bot: Bot, channel: ChatId) -> Self {
        Self { bot, channel }
    }
}

#[async_trait]
impl MembershipGateway for TelegramMembership {
    async fn membership(&self, user_id: i64) -> Membership {
        let Ok(raw_id) = u64::try_from(user_id) else {
            return Membership::NotMember;
        };
        match self.bot.get_chat_member(self.channel, UserId(raw_id)).await {
            Ok(member) => {
                let fact = membership_of(&member.kind);
                tracing::debug!(
                    user_id,
                    status = ?member.status(),
                    fact = ?fact,
                    "Channel membership resolved"
                );
                fact
            }
            Err(error) => {
                let fact = classify_error(&error);
                match fact {
                    Membership::NotMember => tracing::debug!(
                        user_id,
                        error = %error,
                        "User is absent from channel"
                    ),
                    _ => tracing::warn!(
                        user_id,
                        error = %error,
                        "Channel membership query failed"
                    ),
                }
                fact
            }
        }
    }
}

/// Владелец, администратор, участник и ограниченный с `is_member` считаются в канале.
pub fn membership_of(kind: &ChatMemberKind) -> Membership {
    match kind {
        ChatMemberKind::Owner(_) | ChatMemberKind::Administrator(_) | ChatMemberKind::Member(_) => {
            Membership::Member
        }
        ChatMemberKind::Restricted(restricted) if restricted.is_member => Membership::Member,
        ChatMemberKind::Restricted(_) | ChatMemberKind::Left | ChatMemberKind::Banned(_) => {
            Membership::NotMember
        }
    }
}

/// Ошибки Bot API, означающие «пользователя в канале нет», дают `NotMember`.
/// Всё остальное, включая нехватку прав у бота, даёт `Unknown`.
pub fn classify_error(error: &RequestError) -> Membership {
    match error {
        RequestError::Api(ApiError::UserNotFound) => Membership::NotMember,
        RequestError::Api(ApiError::Unknown(description))
            if is_user_absence(description) =>
        {
            Membership::NotMember
        }
        _ => Membership::Unknown,
    }
}

const USER_ABSENCE_MARKERS: &[&str] = &[
    "user not found",
    "participant_id_invalid",
    "user_id_invalid",
    "member not found",
];

fn is_user_absence(description: &str) -> bool {
    let lower = description.to_lowercase();
    USER_ABSENCE_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::{Administrator, Banned, Member, Owner, Restricted, UntilDate};

    fn restricted(is_member: bool) -> ChatMemberKind {
        ChatMemberKind::Restricted(Restricted {
            until_date: UntilDate::Forever,
            is_member,
            can_send_messages: false,
            can_send_audios: false,
            can_send_documents: false,
            can_send_photos: false,
            can_send_videos: false,
            can_send_video_notes: false,
            can_send_voice_notes: false,
            can_send_other_messages: false,
            can_add_web_page_previews: false,
            can_change_info: false,
            can_invite_users: false,
            can_pin_messages: false,
            can_manage_topics: false,
            can_send_polls: false,
        })
    }

    fn administrator() -> ChatMemberKind {
        ChatMemberKind::Administrator(Administrator {
            custom_title: None,
            is_anonymous: false,
            can_be_edited: false,
            can_manage_chat: true,
            can_change_info: false,
            can_post_messages: true,
            can_edit_messages: false,
            can_delete_messages: true,
            can_post_stories: false,
            can_edit_stories: false,
            can_delete_stories: false,
            can_manage_video_chats: false,
            can_invite_users: true,
            can_restrict_members: true,
            can_pin_messages: false,
            can_manage_topics: false,
            can_promote_members: false,
        })
    }

    #[test]
    fn member_statuses_map_to_membership() {
        let cases = [
            (
                ChatMemberKind::Owner(Owner {
                    custom_title: None,
                    is_anonymous: false,
                }),
                Membership::Member,
            ),
            (administrator(), Membership::Member),
            (
                ChatMemberKind::Member(Member { until_date: None }),
                Membership::Member,
            ),
            (restricted(true), Membership::Member),
            (restricted(false), Membership::NotMember),
            (ChatMemberKind::Left, Membership::NotMember),
            (
                ChatMemberKind::Banned(Banned {
                    until_date: UntilDate::Forever,
                }),
                Membership::NotMember,
            ),
        ];
        for (kind, expected) in cases {
            assert_eq!(membership_of(&kind), expected, "status {:?}", kind.status());
        }
    }

    #[test]
    fn user_not_found_is_absence() {
        assert_eq!(
            classify_error(&RequestError::Api(ApiError::UserNotFound)),
            Membership::NotMember
        );
    }

    #[test]
    fn bad_request_about_participant_is_absence() {
        let error = RequestError::Api(ApiError::Unknown(
            "Bad Request: PARTICIPANT_ID_INVALID".to_string(),
        ));
        assert_eq!(classify_error(&error), Membership::NotMember);
        let error = RequestError::Api(ApiError::Unknown(
            "Bad Request: member not found".to_string(),
        ));
        assert_eq!(classify_error(&error), Membership::NotMember);
        let error = RequestError::Api(ApiError::Unknown(
            "Bad Request: USER_ID_INVALID".to_string(),
        ));
        assert_eq!(classify_error(&error), Membership::NotMember);
    }

    #[test]
    fn channel_side_failures_are_inconclusive() {
        assert_eq!(
            classify_error(&RequestError::Api(ApiError::ChatNotFound)),
            Membership::Unknown
        );
        assert_eq!(
            classify_error(&RequestError::Api(ApiError::BotKicked)),
            Membership::Unknown
        );
        let error = RequestError::Api(ApiError::Unknown(
            "Bad Request: chat not found".to_string(),
        ));
        assert_eq!(classify_error(&error), Membership::Unknown);
        let error = RequestError::Api(ApiError::Unknown(
            "Forbidden: bot is not a member of the channel chat".to_string(),
        ));
        assert_eq!(classify_error(&error), Membership::Unknown);
        for description in [
            "Bad Request: member list is inaccessible",
            "Bad Request: not enough rights",
            "Bad Request: need administrator rights in the channel",
            "Bad Request: something unexpected",
        ] {
            let error = RequestError::Api(ApiError::Unknown(description.to_string()));
            assert_eq!(classify_error(&error), Membership::Unknown, "{}", description);
        }
    }

    #[test]
    fn transport_failures_are_inconclusive() {
        assert_eq!(
            classify_error(&RequestError::MigrateToChatId(ChatId(-100))),
            Membership::Unknown
        );
    }
}
