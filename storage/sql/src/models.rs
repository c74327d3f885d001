use servermate::models::{GuildId, RoleId, UserId};
use chrono::Duration;
use sqlx::types::chrono::{DateTime, NaiveDate, Utc};

pub type SqlDatabase = sqlx::MySql;
pub type SqlQuery<'a> = sqlx::query::Query<
    'a,
    SqlDatabase,
    <SqlDatabase as sqlx::database::HasArguments<'a>>::Arguments,
>;
pub type SqlQueryAs<'a, O> = sqlx::query::QueryAs<
    'a,
    SqlDatabase,
    O,
    <SqlDatabase as sqlx::database::HasArguments<'a>>::Arguments,
>;

const GUILD_COLUMNS: &str = "g.guild_id, g.name, g.icon, g.member_count, g.role_count, \
     g.premium, g.group_id, g.status, sg.name AS group_name";

/// A guild the bot has been installed in, as tracked by the bot process.
///
/// `status` is `'active'` while the bot is in the guild and `'left'` after it
/// has been removed; rows are kept around so settings survive a re-invite.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Guild {
    pub guild_id: i64,
    pub name: String,
    pub icon: Option<String>,
    pub member_count: i32,
    pub role_count: i32,
    pub premium: bool,
    pub group_id: Option<i64>,
    pub status: String,
    pub group_name: Option<String>,
}

impl Guild {
    pub fn guild_id(&self) -> GuildId {
        GuildId::new(self.guild_id as u64)
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    pub fn fetch<'a>(guild_id: GuildId) -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT g.guild_id, g.name, g.icon, g.member_count, g.role_count, \
                    g.premium, g.group_id, g.status, sg.name AS group_name \
             FROM guilds g \
             LEFT JOIN server_groups sg ON sg.group_id = g.group_id \
             WHERE g.guild_id = ?",
        )
        .bind(guild_id.get() as i64)
    }

    /// Fetches the active guilds among `ids`. This is the intersection side of
    /// the guild list aggregation: `ids` comes from the user's Discord guild
    /// list and the table holds the bot's installed guilds.
    pub async fn fetch_active_by_ids(
        pool: &crate::SqlPool,
        ids: &[GuildId],
    ) -> sqlx::Result<Vec<Self>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let query = format!(
            "SELECT {} FROM guilds g \
             LEFT JOIN server_groups sg ON sg.group_id = g.group_id \
             WHERE g.status != 'left' AND g.guild_id IN ({})",
            GUILD_COLUMNS, placeholders
        );
        let mut fetch = sqlx::query_as(&query);
        for id in ids {
            fetch = fetch.bind(id.get() as i64);
        }
        fetch.fetch_all(pool).await
    }

    /// Fetches the active member guilds of a server group.
    pub fn fetch_group_members<'a>(group_id: i64) -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT g.guild_id, g.name, g.icon, g.member_count, g.role_count, \
                    g.premium, g.group_id, g.status, sg.name AS group_name \
             FROM guilds g \
             LEFT JOIN server_groups sg ON sg.group_id = g.group_id \
             WHERE g.group_id = ? AND g.status != 'left'",
        )
        .bind(group_id)
    }

    pub fn set_group<'a>(guild_id: GuildId, group_id: Option<i64>) -> SqlQuery<'a> {
        sqlx::query("UPDATE guilds SET group_id = ? WHERE guild_id = ?")
            .bind(group_id)
            .bind(guild_id.get() as i64)
    }

    /// Detaches every guild from a group prior to deleting it.
    pub fn clear_group<'a>(group_id: i64) -> SqlQuery<'a> {
        sqlx::query("UPDATE guilds SET group_id = NULL WHERE group_id = ?").bind(group_id)
    }

    pub fn count_guilds<'a>() -> SqlQueryAs<'a, (i64,)> {
        sqlx::query_as("SELECT COUNT(*) FROM guilds WHERE status != 'left'")
    }

    pub fn count_members<'a>() -> SqlQueryAs<'a, (i64,)> {
        sqlx::query_as(
            "SELECT CAST(COALESCE(SUM(member_count), 0) AS SIGNED) \
             FROM guilds WHERE status != 'left'",
        )
    }

    pub fn count_premium<'a>() -> SqlQueryAs<'a, (i64,)> {
        sqlx::query_as("SELECT COUNT(*) FROM guilds WHERE status != 'left' AND premium = TRUE")
    }
}

/// A named group of guilds whose roles and bans the bot keeps in sync.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServerGroup {
    pub group_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub ban_sync: bool,
    pub server_count: i64,
}

impl ServerGroup {
    pub fn fetch_all<'a>() -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT sg.group_id, sg.name, sg.description, sg.ban_sync, \
                    COUNT(g.guild_id) AS server_count \
             FROM server_groups sg \
             LEFT JOIN guilds g ON g.group_id = sg.group_id AND g.status != 'left' \
             GROUP BY sg.group_id, sg.name, sg.description, sg.ban_sync \
             ORDER BY sg.name",
        )
    }

    pub fn fetch<'a>(group_id: i64) -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT sg.group_id, sg.name, sg.description, sg.ban_sync, \
                    COUNT(g.guild_id) AS server_count \
             FROM server_groups sg \
             LEFT JOIN guilds g ON g.group_id = sg.group_id AND g.status != 'left' \
             WHERE sg.group_id = ? \
             GROUP BY sg.group_id, sg.name, sg.description, sg.ban_sync",
        )
        .bind(group_id)
    }

    pub async fn create(
        pool: &crate::SqlPool,
        name: &str,
        description: Option<&str>,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query("INSERT INTO server_groups (name, description) VALUES (?, ?)")
            .bind(name)
            .bind(description)
            .execute(pool)
            .await?;
        Ok(result.last_insert_id())
    }

    pub fn delete<'a>(group_id: i64) -> SqlQuery<'a> {
        sqlx::query("DELETE FROM server_groups WHERE group_id = ?").bind(group_id)
    }

    pub fn set_ban_sync<'a>(group_id: i64, enabled: bool) -> SqlQuery<'a> {
        sqlx::query("UPDATE server_groups SET ban_sync = ? WHERE group_id = ?")
            .bind(enabled)
            .bind(group_id)
    }
}

/// A row restricting app usage in a guild to holders of a given role.
///
/// A guild with no rows at all is unrestricted; once any row exists, only
/// owners, explicit grants, and members holding a `can_use_app` role pass.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RolePermission {
    pub guild_id: i64,
    pub role_id: i64,
    pub can_use_app: bool,
}

impl RolePermission {
    pub fn role_id(&self) -> RoleId {
        RoleId::new(self.role_id as u64)
    }

    pub fn fetch_guild<'a>(guild_id: GuildId) -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT guild_id, role_id, can_use_app \
             FROM server_role_permissions WHERE guild_id = ?",
        )
        .bind(guild_id.get() as i64)
    }

    pub fn upsert<'a>(guild_id: GuildId, role_id: RoleId, can_use_app: bool) -> SqlQuery<'a> {
        sqlx::query(
            "INSERT INTO server_role_permissions (guild_id, role_id, can_use_app) \
             VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE can_use_app = VALUES(can_use_app)",
        )
        .bind(guild_id.get() as i64)
        .bind(role_id.get() as i64)
        .bind(can_use_app)
    }

    pub fn delete<'a>(guild_id: GuildId, role_id: RoleId) -> SqlQuery<'a> {
        sqlx::query("DELETE FROM server_role_permissions WHERE guild_id = ? AND role_id = ?")
            .bind(guild_id.get() as i64)
            .bind(role_id.get() as i64)
    }
}

/// An explicit per-user access grant, checked before anything else.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccessGrant {
    pub guild_id: i64,
    pub user_id: i64,
    pub granted_by: i64,
    pub created_at: DateTime<Utc>,
}

impl AccessGrant {
    pub fn user_id(&self) -> UserId {
        UserId::new(self.user_id as u64)
    }

    pub fn fetch<'a>(guild_id: GuildId, user_id: UserId) -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT guild_id, user_id, granted_by, created_at \
             FROM server_access_control WHERE guild_id = ? AND user_id = ?",
        )
        .bind(guild_id.get() as i64)
        .bind(user_id.get() as i64)
    }

    pub fn fetch_guild<'a>(guild_id: GuildId) -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT guild_id, user_id, granted_by, created_at \
             FROM server_access_control WHERE guild_id = ? ORDER BY created_at",
        )
        .bind(guild_id.get() as i64)
    }

    pub fn insert<'a>(guild_id: GuildId, user_id: UserId, granted_by: UserId) -> SqlQuery<'a> {
        sqlx::query(
            "INSERT INTO server_access_control (guild_id, user_id, granted_by) \
             VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE granted_by = VALUES(granted_by)",
        )
        .bind(guild_id.get() as i64)
        .bind(user_id.get() as i64)
        .bind(granted_by.get() as i64)
    }

    pub fn delete<'a>(guild_id: GuildId, user_id: UserId) -> SqlQuery<'a> {
        sqlx::query("DELETE FROM server_access_control WHERE guild_id = ? AND user_id = ?")
            .bind(guild_id.get() as i64)
            .bind(user_id.get() as i64)
    }
}

/// A per-guild feature toggle.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GuildFeature {
    pub guild_id: i64,
    pub feature: String,
    pub enabled: bool,
}

impl GuildFeature {
    pub fn fetch_guild<'a>(guild_id: GuildId) -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT guild_id, feature, enabled FROM guild_features \
             WHERE guild_id = ? ORDER BY feature",
        )
        .bind(guild_id.get() as i64)
    }

    pub fn set<'a>(guild_id: GuildId, feature: &'a str, enabled: bool) -> SqlQuery<'a> {
        sqlx::query(
            "INSERT INTO guild_features (guild_id, feature, enabled) \
             VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE enabled = VALUES(enabled)",
        )
        .bind(guild_id.get() as i64)
        .bind(feature)
        .bind(enabled)
    }
}

/// AI summarization settings for one guild.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SummarySettings {
    pub guild_id: i64,
    pub enabled: bool,
    pub channel_id: Option<i64>,
    pub schedule: String,
    pub language: String,
}

impl SummarySettings {
    pub fn fetch<'a>(guild_id: GuildId) -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT guild_id, enabled, channel_id, schedule, language \
             FROM summary_settings WHERE guild_id = ?",
        )
        .bind(guild_id.get() as i64)
    }

    pub fn upsert<'a>(&self) -> SqlQuery<'a> {
        sqlx::query(
            "INSERT INTO summary_settings (guild_id, enabled, channel_id, schedule, language) \
             VALUES (?, ?, ?, ?, ?) \
             ON DUPLICATE KEY UPDATE \
                enabled = VALUES(enabled), \
                channel_id = VALUES(channel_id), \
                schedule = VALUES(schedule), \
                language = VALUES(language)",
        )
        .bind(self.guild_id)
        .bind(self.enabled)
        .bind(self.channel_id)
        .bind(self.schedule.clone())
        .bind(self.language.clone())
    }
}

/// A moderation action recorded by the bot. The dashboard reads and annotates
/// these; it never creates them.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ModerationCase {
    pub case_id: i64,
    pub guild_id: i64,
    pub kind: String,
    pub target_id: i64,
    pub moderator_id: i64,
    pub reason: Option<String>,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl ModerationCase {
    pub fn fetch_guild<'a>(guild_id: GuildId, limit: u64) -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT case_id, guild_id, kind, target_id, moderator_id, reason, resolved, \
                    created_at \
             FROM moderation_cases WHERE guild_id = ? \
             ORDER BY case_id DESC LIMIT ?",
        )
        .bind(guild_id.get() as i64)
        .bind(limit as i64)
    }

    pub fn fetch<'a>(guild_id: GuildId, case_id: i64) -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT case_id, guild_id, kind, target_id, moderator_id, reason, resolved, \
                    created_at \
             FROM moderation_cases WHERE guild_id = ? AND case_id = ?",
        )
        .bind(guild_id.get() as i64)
        .bind(case_id)
    }

    pub fn update<'a>(&self) -> SqlQuery<'a> {
        sqlx::query(
            "UPDATE moderation_cases SET reason = ?, resolved = ? \
             WHERE guild_id = ? AND case_id = ?",
        )
        .bind(self.reason.clone())
        .bind(self.resolved)
        .bind(self.guild_id)
        .bind(self.case_id)
    }
}

/// One role-sync mapping inside a server group: members holding the source
/// role get the target role applied by the bot process.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoleSyncRule {
    pub rule_id: i64,
    pub group_id: i64,
    pub source_guild_id: i64,
    pub source_role_id: i64,
    pub target_guild_id: i64,
    pub target_role_id: i64,
}

impl RoleSyncRule {
    pub fn source_guild_id(&self) -> GuildId {
        GuildId::new(self.source_guild_id as u64)
    }

    pub fn target_guild_id(&self) -> GuildId {
        GuildId::new(self.target_guild_id as u64)
    }

    pub fn fetch_group<'a>(group_id: i64) -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT rule_id, group_id, source_guild_id, source_role_id, \
                    target_guild_id, target_role_id \
             FROM role_sync_rules WHERE group_id = ? ORDER BY rule_id",
        )
        .bind(group_id)
    }

    pub async fn create(
        pool: &crate::SqlPool,
        group_id: i64,
        source_guild_id: GuildId,
        source_role_id: RoleId,
        target_guild_id: GuildId,
        target_role_id: RoleId,
    ) -> sqlx::Result<u64> {
        let result = sqlx::query(
            "INSERT INTO role_sync_rules \
                (group_id, source_guild_id, source_role_id, target_guild_id, target_role_id) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(group_id)
        .bind(source_guild_id.get() as i64)
        .bind(source_role_id.get() as i64)
        .bind(target_guild_id.get() as i64)
        .bind(target_role_id.get() as i64)
        .execute(pool)
        .await?;
        Ok(result.last_insert_id())
    }

    pub fn delete<'a>(group_id: i64, rule_id: i64) -> SqlQuery<'a> {
        sqlx::query("DELETE FROM role_sync_rules WHERE group_id = ? AND rule_id = ?")
            .bind(group_id)
            .bind(rule_id)
    }

    /// Removes every rule of a group prior to deleting it.
    pub fn clear_group<'a>(group_id: i64) -> SqlQuery<'a> {
        sqlx::query("DELETE FROM role_sync_rules WHERE group_id = ?").bind(group_id)
    }
}

/// A creator-alert subscription: the bot announces when the creator goes live
/// or uploads.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CreatorAlert {
    pub alert_id: i64,
    pub guild_id: i64,
    pub platform: String,
    pub creator: String,
    pub channel_id: i64,
    pub template: Option<String>,
}

impl CreatorAlert {
    pub fn fetch_guild<'a>(guild_id: GuildId) -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT alert_id, guild_id, platform, creator, channel_id, template \
             FROM creator_alerts WHERE guild_id = ? ORDER BY alert_id",
        )
        .bind(guild_id.get() as i64)
    }

    pub async fn create(pool: &crate::SqlPool, alert: &Self) -> sqlx::Result<u64> {
        let result = sqlx::query(
            "INSERT INTO creator_alerts (guild_id, platform, creator, channel_id, template) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(alert.guild_id)
        .bind(alert.platform.clone())
        .bind(alert.creator.clone())
        .bind(alert.channel_id)
        .bind(alert.template.clone())
        .execute(pool)
        .await?;
        Ok(result.last_insert_id())
    }

    pub fn delete<'a>(guild_id: GuildId, alert_id: i64) -> SqlQuery<'a> {
        sqlx::query("DELETE FROM creator_alerts WHERE guild_id = ? AND alert_id = ?")
            .bind(guild_id.get() as i64)
            .bind(alert_id)
    }
}

/// One day of per-guild activity, written by the bot process.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GuildStat {
    pub guild_id: i64,
    pub day: NaiveDate,
    pub member_count: i32,
    pub message_count: i64,
}

impl GuildStat {
    pub fn fetch_recent<'a>(guild_id: GuildId, days: u32) -> SqlQueryAs<'a, Self> {
        sqlx::query_as(
            "SELECT guild_id, day, member_count, message_count \
             FROM guild_stats \
             WHERE guild_id = ? AND day >= ? \
             ORDER BY day",
        )
        .bind(guild_id.get() as i64)
        .bind(Self::window_start(Utc::now().date_naive(), days))
    }

    /// First day included in a `days`-long window ending today. A one-day
    /// window is just today; both endpoints are inclusive.
    pub fn window_start(today: NaiveDate, days: u32) -> NaiveDate {
        today - Duration::days(i64::from(days.saturating_sub(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_window_covers_exactly_n_days() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        // A one-day window holds only today's sample.
        assert_eq!(GuildStat::window_start(today, 1), today);
        // Seven days back from May 10 inclusive starts on May 4.
        assert_eq!(
            GuildStat::window_start(today, 7),
            NaiveDate::from_ymd_opt(2024, 5, 4).unwrap()
        );
        assert_eq!(
            GuildStat::window_start(today, 30),
            NaiveDate::from_ymd_opt(2024, 4, 11).unwrap()
        );
    }
}
