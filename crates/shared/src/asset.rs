//! CDN asset URLs for avatars and guild images.

use std::fmt;

use crate::error::AssetError;
use crate::models::{Guild, User};

pub const CDN_BASE: &str = "https://cdn.discordapp.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Jpg,
    Webp,
    Png,
    Gif,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Jpg => "jpg",
            ImageFormat::Webp => "webp",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
        }
    }

    pub fn is_static(self) -> bool {
        !matches!(self, ImageFormat::Gif)
    }
}

/// Which image of a guild to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuildImage {
    Icon,
    Splash,
    Banner,
}

impl GuildImage {
    fn path(self) -> &'static str {
        match self {
            GuildImage::Icon => "icons",
            GuildImage::Splash => "splashes",
            GuildImage::Banner => "banners",
        }
    }

    fn hash(self, guild: &Guild) -> Option<&str> {
        match self {
            GuildImage::Icon => guild.icon.as_deref(),
            GuildImage::Splash => guild.splash.as_deref(),
            GuildImage::Banner => guild.banner.as_deref(),
        }
    }
}

pub fn valid_icon_size(size: u16) -> bool {
    size.is_power_of_two() && (16..=4096).contains(&size)
}

/// A resolved CDN URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    url: String,
}

impl Asset {
    /// Avatar URL for `user`. With no `format`, animated avatars resolve to
    /// gif and everything else to `static_format`.
    pub fn avatar(
        user: &User,
        format: Option<ImageFormat>,
        static_format: ImageFormat,
        size: u16,
    ) -> Result<Self, AssetError> {
        if !valid_icon_size(size) {
            return Err(AssetError::InvalidSize(size));
        }
        if !static_format.is_static() {
            return Err(AssetError::InvalidFormat(static_format.extension()));
        }
        if format == Some(ImageFormat::Gif) && !user.is_avatar_animated() {
            return Err(AssetError::NotAnimated);
        }

        let Some(hash) = user.avatar.as_deref() else {
            return Ok(Self::default_avatar(user));
        };

        let format = format.unwrap_or(if user.is_avatar_animated() {
            ImageFormat::Gif
        } else {
            static_format
        });

        Ok(Self {
            url: format!(
                "{CDN_BASE}/avatars/{}/{hash}.{}?size={size}",
                user.id,
                format.extension()
            ),
        })
    }

    /// One of the five stock avatars, picked by discriminator.
    pub fn default_avatar(user: &User) -> Self {
        let index = user.discriminator.parse::<u64>().unwrap_or_default() % 5;
        Self {
            url: format!("{CDN_BASE}/embed/avatars/{index}.png"),
        }
    }

    /// Guild image URL, or `None` when the guild has no such image.
    pub fn guild_image(
        guild: &Guild,
        image: GuildImage,
        format: ImageFormat,
        size: u16,
    ) -> Result<Option<Self>, AssetError> {
        if !valid_icon_size(size) {
            return Err(AssetError::InvalidSize(size));
        }
        if !format.is_static() {
            return Err(AssetError::InvalidFormat(format.extension()));
        }

        Ok(image.hash(guild).map(|hash| Self {
            url: format!(
                "{CDN_BASE}/{}/{}/{hash}.{}?size={size}",
                image.path(),
                guild.id,
                format.extension()
            ),
        }))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
