use crate::{auth, prelude::*, AppState};
use actix_web::{get, web, HttpRequest};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use servermate::models::GuildId;
use servermate_sql as sql;

const DEFAULT_WINDOW_DAYS: u32 = 30;
const MAX_WINDOW_DAYS: u32 = 90;

#[derive(Debug, Deserialize)]
struct AnalyticsQuery {
    days: Option<u32>,
}

fn window_days(requested: Option<u32>) -> u32 {
    requested.unwrap_or(DEFAULT_WINDOW_DAYS).clamp(1, MAX_WINDOW_DAYS)
}

#[derive(Debug, Serialize)]
struct DataPoint {
    day: NaiveDate,
    member_count: i32,
    message_count: i64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct Totals {
    members: i32,
    messages: i64,
}

#[derive(Debug, Serialize)]
struct AnalyticsResponse {
    days: u32,
    totals: Totals,
    series: Vec<DataPoint>,
}

/// Member total is the latest sample; message total is the sum over the
/// window.
fn summarize(series: &[sql::GuildStat]) -> Totals {
    Totals {
        members: series.last().map(|stat| stat.member_count).unwrap_or(0),
        messages: series.iter().map(|stat| stat.message_count).sum(),
    }
}

#[get("/{guild_id}/analytics")]
async fn get_analytics(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<u64>,
    query: web::Query<AnalyticsQuery>,
) -> JsonResult<AnalyticsResponse> {
    let guild_id: GuildId = path_id(path.into_inner(), "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let days = window_days(query.days);
    let series = sql::GuildStat::fetch_recent(guild_id, days)
        .fetch_all(&state.sql)
        .await
        .internal_error("failed to load guild analytics")?;

    Ok(web::Json(AnalyticsResponse {
        days,
        totals: summarize(&series),
        series: series
            .into_iter()
            .map(|stat| DataPoint {
                day: stat.day,
                member_count: stat.member_count,
                message_count: stat.message_count,
            })
            .collect(),
    }))
}

pub fn scoped_config(cfg: &mut web::ServiceConfig) {
    cfg.service(get_analytics);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(day: &str, members: i32, messages: i64) -> sql::GuildStat {
        sql::GuildStat {
            guild_id: 1,
            day: day.parse().unwrap(),
            member_count: members,
            message_count: messages,
        }
    }

    #[test]
    fn test_window_days_bounds() {
        assert_eq!(window_days(None), DEFAULT_WINDOW_DAYS);
        assert_eq!(window_days(Some(0)), 1);
        assert_eq!(window_days(Some(7)), 7);
        assert_eq!(window_days(Some(400)), MAX_WINDOW_DAYS);
    }

    #[test]
    fn test_summarize_empty_series() {
        assert_eq!(
            summarize(&[]),
            Totals {
                members: 0,
                messages: 0
            }
        );
    }

    #[test]
    fn test_summarize_takes_latest_members_and_sums_messages() {
        let series = vec![
            stat("2024-05-01", 90, 1000),
            stat("2024-05-02", 95, 1200),
            stat("2024-05-03", 93, 800),
        ];
        assert_eq!(
            summarize(&series),
            Totals {
                members: 93,
                messages: 3000
            }
        );
    }
}
