//! Deep-link схемы VPN-клиентов и ссылки на редиректор.
//!
//! Telegram не открывает в inline-кнопках произвольные схемы вроде `streisand://`,
//! поэтому кнопка ведёт на HTTPS-редиректор, а тот уже отдаёт страницу с переходом
//! в приложение.

pub struct AppScheme {
    pub app: &'static str,
    pub label: &'static str,
    /// Шаблон с подстановками `{url}` и `{name}`.
    pub template: &'static str,
}

pub struct Platform {
    pub system: &'static str,
    pub label: &'static str,
    pub apps: &'static [AppScheme],
}

pub const PLATFORMS: &[Platform] = &[
    Platform {
        system: "ios",
        label: "🍏 iOS",
        apps: &[
            AppScheme {
                app: "streisand",
                label: "Streisand",
                template: "streisand://import/{url}#{name}",
            },
            AppScheme {
                app: "karing",
                label: "Karing",
                template: "karing://install-config?url={url}&name={name}",
            },
            AppScheme {
                app: "foxray",
                label: "FoXray",
                template: "foxray://yiguo.dev/sub/add/?url={url}#{name}",
            },
            AppScheme {
                app: "v2box",
                label: "V2Box",
                template: "v2box://install-sub?url={url}&name={name}",
            },
            AppScheme {
                app: "singbox",
                label: "sing-box",
                template: "sing-box://import-remote-profile?url={url}#{name}",
            },
            AppScheme {
                app: "happ",
                label: "Happ",
                template: "happ://add/{url}",
            },
        ],
    },
    Platform {
        system: "android",
        label: "🤖 Android",
        apps: &[
            AppScheme {
                app: "nekoray",
                label: "NekoBox",
                template: "sn://subscription?url={url}&name={name}",
            },
            AppScheme {
                app: "v2rayng",
                label: "v2rayNG",
                template: "v2rayng://install-sub?url={url}&name={name}",
            },
            AppScheme {
                app: "hiddify",
                label: "Hiddify",
                template: "hiddify://install-config/?url={url}",
            },
        ],
    },
    Platform {
        system: "pc",
        label: "💻 ПК",
        apps: &[
            AppScheme {
                app: "clashx",
                label: "ClashX",
                template: "clashx://install-config?url={url}",
            },
            AppScheme {
                app: "clash",
                label: "Clash",
                template: "clash://install-config?url={url}",
            },
            AppScheme {
                app: "hiddify",
                label: "Hiddify",
                template: "hiddify://install-config/?url={url}",
            },
        ],
    },
];

pub fn platform(system: &str) -> Option<&'static Platform> {
    PLATFORMS.iter().find(|p| p.system == system)
}

pub fn app_scheme(system: &str, app: &str) -> Option<&'static AppScheme> {
    platform(system)?.apps.iter().find(|a| a.app == app)
}

/// Ссылка для открытия подписки в приложении. `None` для неизвестной пары.
pub fn build_app_link(system: &str, app: &str, url: &str, name: &str) -> Option<String> {
    let scheme = app_scheme(system, app)?;
    Some(scheme.template.replace("{url}", url).replace("{name}", name))
}

pub fn redirect_link(base_url: &str, system: &str, app: &str, subscription_url: &str, name: &str) -> String {
    format!(
        "{}/redirect/{}/{}?url={}&name={}",
        base_url.trim_end_matches('/'),
        system,
        app,
        urlencoding::encode(subscription_url),
        urlencoding::encode(name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_platform_has_apps() {
        for platform in PLATFORMS {
            assert!(!platform.apps.is_empty(), "{} has no apps", platform.system);
        }
        assert_eq!(platform("android").map(|p| p.apps.len()), Some(3));
        assert!(platform("symbian").is_none());
    }

    #[test]
    fn app_link_substitutes_url_and_name() {
        assert_eq!(
            build_app_link("ios", "streisand", "https://s.example.com/sub/a", "VPN").as_deref(),
            Some("streisand://import/https://s.example.com/sub/a#VPN")
        );
        assert_eq!(
            build_app_link("android", "v2rayng", "https://s/x", "My").as_deref(),
            Some("v2rayng://install-sub?url=https://s/x&name=My")
        );
        assert_eq!(
            build_app_link("pc", "hiddify", "https://s/x", "ignored").as_deref(),
            Some("hiddify://install-config/?url=https://s/x")
        );
    }

    #[test]
    fn unknown_pair_has_no_link() {
        assert!(build_app_link("ios", "nekoray", "u", "n").is_none());
        assert!(build_app_link("linux", "clash", "u", "n").is_none());
    }

    #[test]
    fn redirect_link_encodes_query() {
        assert_eq!(
            redirect_link(
                "https://r.example.com/",
                "ios",
                "karing",
                "https://s.example.com/sub/a?b=1",
                "Мой VPN"
            ),
            "https://r.example.com/redirect/ios/karing?url=https%3A%2F%2Fs.example.com%2Fsub%2Fa%3Fb%3D1&name=%D0%9C%D0%BE%D0%B9%20VPN"
        );
    }
}
