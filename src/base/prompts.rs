//! Default prompt templates and canned replies.

/// Default system directive for conversational replies.
pub const SYSTEM_DIRECTIVE: &str = r#####"
You are a friendly member of a QQ group chat.  People @-mention you to talk, ask questions, or ask for help.

- Reply in the language the user wrote in (usually Chinese).
- Keep replies short: a few sentences, no markdown headings, no code fences unless asked for code.
- QQ does not render markdown or math, so write plain text.
- When tool results are provided to you, prefer them over your own knowledge, and say so if a tool failed.
"#####;

/// Default help text, returned by the help rule.
pub const HELP_MESSAGE: &str = r#####"🌸使用方法🌸
1. 报时: @我并发送 报时，显示下班时间
2. AI回复: @我输入任意内容即可与AI对话
3. 天气: @我并发送 北京的天气
4. 假期: @我并发送 假期 或 倒计时，显示距离假期的天数
5. 设定: @我并发送 设定<内容> 设置你自己的AI角色，群角色设定<内容> 设置本群的AI角色
6. ping: 私聊发送 ping 检查机器人是否在线"#####;

/// Heading placed in front of tool results added to a completion call.
pub const TOOL_RESULTS_HEADING: &str = "## Tool Results\n\nThe following tools were called to help answer the latest user message:";

/// Reply to the off-work countdown once the working day is over.
pub const OFF_WORK_ALREADY: &str = "不会有人这个时间还在上班吧?";

/// Reply to the holiday countdown when no holidays are configured.
pub const NO_HOLIDAYS: &str = "抱歉，没有找到假期信息";

/// First line of the holiday countdown.
pub const HOLIDAY_HEADING: &str = "距离下面的假期还有: ";

/// Reply once a member directive is stored.
pub const MEMBER_DIRECTIVE_SAVED: &str = "角色设定成功！";

/// Reply once a group directive is stored.
pub const GROUP_DIRECTIVE_SAVED: &str = "群角色设定成功！";

/// Prefix of the reply that shows the current directive.
pub const CURRENT_DIRECTIVE: &str = "(当前设定): ";
