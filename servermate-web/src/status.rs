use crate::{prelude::*, AppState};
use actix_web::{get, web};
use serde::Serialize;
use servermate_sql as sql;

#[derive(Serialize)]
struct BotStatus {
    guilds: i64,
    members: i64,
    premium_guilds: i64,
    permission_cache_entries: usize,
}

#[get("/status")]
async fn bot_status(state: web::Data<AppState>) -> JsonResult<BotStatus> {
    let guilds = sql::Guild::count_guilds()
        .fetch_one(&state.sql)
        .await
        .internal_error("failed to count guilds")?
        .0;
    let members = sql::Guild::count_members()
        .fetch_one(&state.sql)
        .await
        .internal_error("failed to count members")?
        .0;
    let premium_guilds = sql::Guild::count_premium()
        .fetch_one(&state.sql)
        .await
        .internal_error("failed to count premium guilds")?
        .0;

    Ok(web::Json(BotStatus {
        guilds,
        members,
        premium_guilds,
        permission_cache_entries: state.permissions.len(),
    }))
}

pub fn scoped_config(cfg: &mut web::ServiceConfig) {
    cfg.service(bot_status);
}
