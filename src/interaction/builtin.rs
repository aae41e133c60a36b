//! Built-in static rules, and the named handlers dynamic rules can refer to.

use chrono::{Datelike, Local, NaiveDate, NaiveTime, Timelike, Weekday};
use tracing::instrument;

use crate::{
    base::{
        config::Holiday,
        prompts::{CURRENT_DIRECTIVE, GROUP_DIRECTIVE_SAVED, HOLIDAY_HEADING, MEMBER_DIRECTIVE_SAVED, NO_HOLIDAYS, OFF_WORK_ALREADY},
        types::{ConversationKey, Res, Reply, Scene},
    },
    interaction::{
        dynamic::HandlerPool,
        rule::{Priority, Rule, TriggerContext},
    },
    service::directive::DirectiveScope,
};

/// Texts that ask for help.  The empty string covers a bare mention.
const HELP_TRIGGERS: [&str; 5] = ["?", "？", "", "帮助", "help"];

/// Texts that ask for the off-work countdown.
const OFF_WORK_TRIGGERS: [&str; 2] = ["报时", "11"];

/// Off-work times the countdown reports, with their labels.
const OFF_WORK_TARGETS: [(u32, u32, &str); 3] = [(17, 0, "5:00.PM"), (17, 30, "5:30.PM"), (18, 0, "6:00.PM")];

/// From this hour on, the countdown only teases.
const OFF_WORK_CUTOFF_HOUR: u32 = 18;

/// Words that ask for the holiday countdown.
const HOLIDAY_TRIGGERS: [&str; 2] = ["假期", "倒计时"];

/// Prefix that sets the sender's own directive in a group.
const MEMBER_DIRECTIVE_PREFIX: &str = "设定";

/// Prefix that sets the group's directive.
const GROUP_DIRECTIVE_PREFIX: &str = "群角色设定";

/// Words that make the encouragement rule chime in.
const SMART_REPLY_TRIGGERS: [&str; 4] = ["人生", "不想上班", "好累", "工作"];

// Rules.

/// The built-in static rules, in registration order.
pub fn builtin_rules() -> Vec<Rule> {
    vec![
        Rule::new(Priority::Static, [Scene::MentionsBot, Scene::Private], "help", is_help_request, help),
        Rule::new(Priority::Static, [Scene::Private], "ping", |context: &TriggerContext| Ok(context.message.text.trim() == "ping"), ping),
        Rule::new(
            Priority::Static,
            [Scene::MentionsBot, Scene::MentionsAll, Scene::Group],
            "off-work countdown",
            |context: &TriggerContext| Ok(OFF_WORK_TRIGGERS.contains(&context.message.text.trim())),
            off_work,
        ),
        Rule::new(Priority::Static, [Scene::MentionsBot], "holiday countdown", is_holiday_request, holiday),
        Rule::new(Priority::Static, [Scene::MentionsBot], "directive", is_directive_request, directive),
        Rule::new(Priority::Static, [Scene::MentionsBot], "chat", is_chat_allowed, chat),
        Rule::new(Priority::Static, [Scene::Group], "repeat", is_repeat, repeat),
        Rule::new(Priority::Static, [Scene::Group], "smart reply", is_smart_reply, smart_reply),
    ]
}

/// The named handlers available to `handlerRef` dynamic rules.
pub fn builtin_handlers() -> HandlerPool {
    let mut pool = HandlerPool::new();

    pool.register("help", help);
    pool.register("ping", ping);
    pool.register("off_work_countdown", off_work);
    pool.register("holiday_countdown", holiday);
    pool.register("repeat", repeat);
    pool.register("chat", chat);

    pool
}

// Conditions.

fn is_help_request(context: &TriggerContext) -> Res<bool> {
    Ok(HELP_TRIGGERS.contains(&context.message.text.trim()))
}

/// True only for the second of a run of equal texts, so a run is echoed once.
fn is_repeat(context: &TriggerContext) -> Res<bool> {
    let fires = match context.window.as_slice() {
        [.., before, previous, last] => previous.text == last.text && before.text != last.text,
        [previous, last] => previous.text == last.text,
        _ => false,
    };

    Ok(fires && !context.message.text.trim().is_empty())
}

fn is_holiday_request(context: &TriggerContext) -> Res<bool> {
    let text = context.message.text.trim();

    Ok(HOLIDAY_TRIGGERS.iter().any(|t| text.contains(t)))
}

fn is_directive_request(context: &TriggerContext) -> Res<bool> {
    let text = context.message.text.trim();

    Ok(text.starts_with(MEMBER_DIRECTIVE_PREFIX) || text.starts_with(GROUP_DIRECTIVE_PREFIX))
}

/// Stays off until a directive is configured.
fn is_smart_reply(context: &TriggerContext) -> Res<bool> {
    let configured = context.orchestrator.config().smart_reply_directive.as_deref().is_some_and(|d| !d.trim().is_empty());

    Ok(configured && SMART_REPLY_TRIGGERS.iter().any(|t| context.message.text.contains(t)))
}

fn is_chat_allowed(context: &TriggerContext) -> Res<bool> {
    let blocked = &context.orchestrator.config().blocked_accounts;

    Ok(!blocked.contains(&context.message.sender))
}

// Actions.

async fn help(context: TriggerContext) -> Res<Reply> {
    Ok(Reply::text(context.orchestrator.config().help_message.clone()))
}

async fn ping(_context: TriggerContext) -> Res<Reply> {
    Ok(Reply::text("pong"))
}

async fn off_work(context: TriggerContext) -> Res<Reply> {
    let now = Local::now().time();

    Ok(Reply::text(off_work_countdown(now, context.message.scene)))
}

async fn holiday(context: TriggerContext) -> Res<Reply> {
    let config = context.orchestrator.config();
    let today = Local::now().date_naive();

    Ok(Reply::text(holiday_countdown(today, &config.holidays, &config.makeup_workdays)))
}

/// `设定<text>` stores the sender's directive in this group, `群角色设定<text>` the group's.
/// Without text, the current directive is shown.
#[instrument(skip_all, fields(conversation = %context.message.conversation, sender = context.message.sender))]
async fn directive(context: TriggerContext) -> Res<Reply> {
    let message = &context.message;

    let ConversationKey::Group(group_id) = message.conversation else {
        return Ok(Reply::text(""));
    };

    let text = message.text.trim();

    let (scope, setting, saved) = if let Some(setting) = text.strip_prefix(GROUP_DIRECTIVE_PREFIX) {
        (DirectiveScope::Group(group_id), setting, GROUP_DIRECTIVE_SAVED)
    } else if let Some(setting) = text.strip_prefix(MEMBER_DIRECTIVE_PREFIX) {
        (DirectiveScope::Member { group_id, user_id: message.sender }, setting, MEMBER_DIRECTIVE_SAVED)
    } else {
        return Ok(Reply::text(""));
    };

    let directives = context.orchestrator.directives();
    let setting = setting.trim();

    if setting.is_empty() {
        let current = directives.get(scope).await?.unwrap_or_default();
        return Ok(Reply::text(format!("{CURRENT_DIRECTIVE}{current}")));
    }

    directives.set(scope, setting).await?;

    Ok(Reply::text(saved))
}

async fn repeat(context: TriggerContext) -> Res<Reply> {
    Ok(Reply::text(context.message.text.trim()))
}

#[instrument(skip_all, fields(conversation = %context.message.conversation, sender = context.message.sender))]
async fn chat(context: TriggerContext) -> Res<Reply> {
    let message = &context.message;
    let session_id = format!("{}:{}", message.conversation, message.sender);

    let directive = context.orchestrator.directive_for(&message.conversation, message.sender).await?;
    let reply = context.orchestrator.chat_with_session_as(&session_id, &directive, message.text.trim()).await?;

    Ok(Reply::text(reply))
}

/// A one-off encouragement, without session history.
async fn smart_reply(context: TriggerContext) -> Res<Reply> {
    let Some(directive) = context.orchestrator.config().smart_reply_directive.clone() else {
        return Ok(Reply::text(""));
    };

    let reply = context.orchestrator.chat_as(&directive, context.message.text.trim()).await?;

    Ok(Reply::text(reply))
}

// Helpers.

/// Time left until each off-work target that has not passed yet, one per line.
///
/// Each line reads `\n <label> -> H:M:S` without zero padding.  Outside a direct mention
/// the leading newline is dropped.
pub fn off_work_countdown(now: NaiveTime, scene: Scene) -> String {
    if now.hour() >= OFF_WORK_CUTOFF_HOUR {
        return OFF_WORK_ALREADY.to_string();
    }

    let mut message = String::new();

    for (hour, minute, label) in OFF_WORK_TARGETS {
        let Some(target) = NaiveTime::from_hms_opt(hour, minute, 0) else {
            continue;
        };

        if now >= target {
            continue;
        }

        let remaining = (target - now).num_seconds();
        message.push_str(&format!("\n {label} -> {}:{}:{}", remaining / 3600, remaining % 3600 / 60, remaining % 60));
    }

    if scene != Scene::MentionsBot {
        message = message.strip_prefix('\n').map(str::to_string).unwrap_or(message);
    }

    message
}

/// Days left until each upcoming holiday, with the working days in between.
///
/// Working days are the weekdays strictly between `today` and the holiday, plus any
/// `makeup_workdays` in that range that fall on a weekend.  Past holidays are skipped.
pub fn holiday_countdown(today: NaiveDate, holidays: &[Holiday], makeup_workdays: &[NaiveDate]) -> String {
    let upcoming = holidays.iter().filter(|h| h.date >= today).collect::<Vec<_>>();

    if upcoming.is_empty() {
        return NO_HOLIDAYS.to_string();
    }

    let mut message = format!("{HOLIDAY_HEADING}\n");

    for holiday in upcoming {
        let days = (holiday.date - today).num_days();
        let workdays = working_days_between(today, holiday.date, makeup_workdays);

        message.push_str(&format!("{} [{}]: {}天，还需要上{}天班\n", holiday.name, holiday.date, days, workdays));
    }

    message.trim_end().to_string()
}

fn working_days_between(start: NaiveDate, end: NaiveDate, makeup_workdays: &[NaiveDate]) -> usize {
    start
        .iter_days()
        .skip(1)
        .take_while(|day| *day < end)
        .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) || makeup_workdays.contains(day))
        .count()
}

// Tests.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::{
        base::{
            config::{Config, ConfigInner},
            types::{ChatMessage, ConversationKey},
        },
        interaction::{
            normalizer::{NormalizedMessage, RawEvent},
            orchestrator::Orchestrator,
        },
        service::{
            db::DbClient,
            directive::DirectiveStore,
            llm::{GenericLlmClient, LlmClient},
            mcp::fake,
            session::SessionStore,
        },
    };

    struct EchoLlm;

    #[async_trait]
    impl GenericLlmClient for EchoLlm {
        async fn complete(&self, messages: &[ChatMessage]) -> Res<String> {
            Ok(format!("echo: {}", messages.last().map(|m| m.content.as_str()).unwrap_or_default()))
        }
    }

    fn orchestrator(config: Config) -> Orchestrator {
        let db = DbClient::memory();
        let sessions = SessionStore::new(db.clone(), config.session_capacity);
        let (tools, _) = fake::manager();

        Orchestrator::new(LlmClient::new(Arc::new(EchoLlm)), sessions, DirectiveStore::new(db), tools, config)
    }

    fn message(text: &str, scene: Scene) -> Arc<NormalizedMessage> {
        Arc::new(NormalizedMessage {
            raw: Arc::new(RawEvent::default()),
            scene,
            mentioned: None,
            text: text.to_string(),
            conversation: ConversationKey::Group(777),
            sender: 42,
            self_id: 1000,
            timestamp: Utc::now(),
        })
    }

    fn context(texts: &[&str], scene: Scene) -> TriggerContext {
        let window = texts.iter().map(|t| message(t, scene)).collect::<Vec<_>>();
        let last = window.last().cloned().unwrap_or_else(|| message("", scene));

        TriggerContext {
            message: last,
            window: Arc::new(window),
            orchestrator: orchestrator(Config::default()),
        }
    }

    fn time(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_countdown_lists_every_target_when_mentioned() {
        let text = off_work_countdown(time(16, 0, 0), Scene::MentionsBot);

        assert_eq!(text, "\n 5:00.PM -> 1:0:0\n 5:30.PM -> 1:30:0\n 6:00.PM -> 2:0:0");
    }

    #[test]
    fn test_countdown_skips_passed_targets_and_leading_newline() {
        let text = off_work_countdown(time(17, 15, 30), Scene::Group);

        assert_eq!(text, " 5:30.PM -> 0:14:30\n 6:00.PM -> 0:44:30");
    }

    #[test]
    fn test_countdown_after_hours() {
        assert_eq!(off_work_countdown(time(18, 0, 0), Scene::MentionsBot), OFF_WORK_ALREADY);
        assert_eq!(off_work_countdown(time(23, 59, 59), Scene::Group), OFF_WORK_ALREADY);
    }

    #[test]
    fn test_countdown_floors_fractional_seconds() {
        let now = NaiveTime::from_hms_milli_opt(17, 59, 58, 500).unwrap();

        assert_eq!(off_work_countdown(now, Scene::MentionsAll), " 6:00.PM -> 0:0:1");
    }

    #[test]
    fn test_repeat_fires_once_per_run() {
        assert!(!is_repeat(&context(&["a"], Scene::Group)).unwrap());
        assert!(is_repeat(&context(&["a", "a"], Scene::Group)).unwrap());
        assert!(is_repeat(&context(&["x", "a", "a"], Scene::Group)).unwrap());
        assert!(!is_repeat(&context(&["a", "a", "a"], Scene::Group)).unwrap());
        assert!(!is_repeat(&context(&["a", "b"], Scene::Group)).unwrap());
        assert!(!is_repeat(&context(&["x", " ", " "], Scene::Group)).unwrap());
    }

    #[test]
    fn test_help_triggers() {
        assert!(is_help_request(&context(&[" ? "], Scene::MentionsBot)).unwrap());
        assert!(is_help_request(&context(&["？"], Scene::MentionsBot)).unwrap());
        assert!(is_help_request(&context(&[""], Scene::MentionsBot)).unwrap());
        assert!(!is_help_request(&context(&["报时"], Scene::MentionsBot)).unwrap());
    }

    #[test]
    fn test_builtin_rule_order() {
        let descriptions = builtin_rules().into_iter().map(|r| r.description).collect::<Vec<_>>();

        assert_eq!(
            descriptions,
            vec!["help", "ping", "off-work countdown", "holiday countdown", "directive", "chat", "repeat", "smart reply"]
        );
    }

    #[test]
    fn test_handler_pool_names() {
        assert_eq!(builtin_handlers().names(), vec!["chat", "help", "holiday_countdown", "off_work_countdown", "ping", "repeat"]);
    }

    #[tokio::test]
    async fn test_blocked_accounts_are_not_chatted_with() {
        let config = Config {
            inner: Arc::new(ConfigInner {
                blocked_accounts: vec![42],
                ..Default::default()
            }),
        };
        let mut blocked = context(&["hi"], Scene::MentionsBot);
        blocked.orchestrator = orchestrator(config);

        assert!(!is_chat_allowed(&blocked).unwrap());
        assert!(is_chat_allowed(&context(&["hi"], Scene::MentionsBot)).unwrap());
    }

    #[tokio::test]
    async fn test_chat_uses_sender_session() {
        let context = context(&[" 你好 "], Scene::MentionsBot);
        let orchestrator = context.orchestrator.clone();

        let reply = chat(context).await.unwrap();

        assert_eq!(reply, Reply::text("echo: 你好"));
        assert_eq!(orchestrator.sessions().load("group:777:42").await.unwrap().len(), 3);
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn holidays() -> Vec<Holiday> {
        vec![
            Holiday {
                name: "劳动节".to_string(),
                date: date(2025, 5, 1),
            },
            Holiday {
                name: "国庆节".to_string(),
                date: date(2025, 10, 1),
            },
        ]
    }

    #[test]
    fn test_holiday_countdown_counts_days_and_working_days() {
        // Thursday 2025-09-25: Fri 26, Mon 29, Tue 30 are weekdays, Sun 28 is a makeup day.
        let text = holiday_countdown(date(2025, 9, 25), &holidays(), &[date(2025, 9, 28)]);

        assert_eq!(text, format!("{HOLIDAY_HEADING}\n国庆节 [2025-10-01]: 6天，还需要上4天班"));
    }

    #[test]
    fn test_holiday_countdown_without_upcoming_holidays() {
        assert_eq!(holiday_countdown(date(2025, 10, 2), &holidays(), &[]), NO_HOLIDAYS);
        assert_eq!(holiday_countdown(date(2025, 1, 1), &[], &[]), NO_HOLIDAYS);
    }

    #[test]
    fn test_holiday_countdown_on_the_day() {
        let text = holiday_countdown(date(2025, 10, 1), &holidays(), &[]);

        assert!(text.ends_with("国庆节 [2025-10-01]: 0天，还需要上0天班"));
    }

    #[test]
    fn test_holiday_and_directive_triggers() {
        assert!(is_holiday_request(&context(&["还有多久放假期"], Scene::MentionsBot)).unwrap());
        assert!(is_holiday_request(&context(&[" 倒计时 "], Scene::MentionsBot)).unwrap());
        assert!(!is_holiday_request(&context(&["报时"], Scene::MentionsBot)).unwrap());

        assert!(is_directive_request(&context(&[" 设定 说话像猫"], Scene::MentionsBot)).unwrap());
        assert!(is_directive_request(&context(&["群角色设定"], Scene::MentionsBot)).unwrap());
        assert!(!is_directive_request(&context(&["我的设定"], Scene::MentionsBot)).unwrap());
    }

    #[tokio::test]
    async fn test_directive_rule_stores_and_shows_directives() {
        let set_member = context(&["设定 说话像猫"], Scene::MentionsBot);
        let orchestrator = set_member.orchestrator.clone();

        assert_eq!(directive(set_member).await.unwrap(), Reply::text(MEMBER_DIRECTIVE_SAVED));

        let mut set_group = context(&["群角色设定用文言文"], Scene::MentionsBot);
        set_group.orchestrator = orchestrator.clone();
        assert_eq!(directive(set_group).await.unwrap(), Reply::text(GROUP_DIRECTIVE_SAVED));

        let mut show = context(&["设定"], Scene::MentionsBot);
        show.orchestrator = orchestrator.clone();
        assert_eq!(directive(show).await.unwrap(), Reply::text(format!("{CURRENT_DIRECTIVE}说话像猫")));

        let composed = orchestrator.directive_for(&ConversationKey::Group(777), 42).await.unwrap();
        assert!(composed.contains("用文言文"));
        assert!(composed.ends_with("说话像猫"));
    }

    #[tokio::test]
    async fn test_chat_uses_the_stored_directive() {
        let context = context(&["你好"], Scene::MentionsBot);
        let orchestrator = context.orchestrator.clone();

        orchestrator.directives().set(DirectiveScope::Member { group_id: 777, user_id: 42 }, "叫我主人").await.unwrap();
        chat(context).await.unwrap();

        let stored = orchestrator.sessions().load("group:777:42").await.unwrap();
        assert!(stored[0].content.ends_with("叫我主人"));
    }

    #[tokio::test]
    async fn test_smart_reply_needs_a_directive() {
        assert!(!is_smart_reply(&context(&["好累啊"], Scene::Group)).unwrap());

        let config = Config {
            inner: Arc::new(ConfigInner {
                smart_reply_directive: Some("给出一句鼓励".to_string()),
                ..Default::default()
            }),
        };
        let mut tired = context(&["好累啊"], Scene::Group);
        tired.orchestrator = orchestrator(config);

        assert!(is_smart_reply(&tired).unwrap());
        assert_eq!(smart_reply(tired).await.unwrap(), Reply::text("echo: 好累啊"));
    }
}
