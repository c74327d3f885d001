pub use twilight_model::guild::Permissions;
pub use twilight_model::id::{marker, Id};

pub type GuildId = Id<marker::GuildMarker>;
pub type UserId = Id<marker::UserMarker>;
pub type RoleId = Id<marker::RoleMarker>;
pub type ChannelId = Id<marker::ChannelMarker>;

const CDN_BASE: &str = "https://cdn.discordapp.com";

/// CDN URL for a guild icon, if the guild has one set.
pub fn guild_icon_url(guild_id: GuildId, icon: Option<&str>) -> Option<String> {
    icon.map(|hash| {
        let ext = if hash.starts_with("a_") { "gif" } else { "png" };
        format!("{}/icons/{}/{}.{}", CDN_BASE, guild_id, hash, ext)
    })
}

/// Parses the permission integer Discord serializes as a decimal string.
pub fn parse_permissions(raw: &str) -> Permissions {
    raw.parse::<u64>()
        .map(Permissions::from_bits_truncate)
        .unwrap_or_else(|_| Permissions::empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guild_icon_url() {
        let id = GuildId::new(777);
        assert_eq!(guild_icon_url(id, None), None);
        assert_eq!(
            guild_icon_url(id, Some("abc123")).unwrap(),
            "https://cdn.discordapp.com/icons/777/abc123.png"
        );
        assert_eq!(
            guild_icon_url(id, Some("a_xyz")).unwrap(),
            "https://cdn.discordapp.com/icons/777/a_xyz.gif"
        );
    }

    #[test]
    fn test_parse_permissions() {
        assert!(parse_permissions("8").contains(Permissions::ADMINISTRATOR));
        assert!(parse_permissions("32").contains(Permissions::MANAGE_GUILD));
        assert_eq!(parse_permissions("not a number"), Permissions::empty());
        assert_eq!(parse_permissions(""), Permissions::empty());
    }
}
