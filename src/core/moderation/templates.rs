// Message templates - placeholder substitution and the built-in notice texts
// used when a policy carries no custom message.

/// Fallback notice for ML verdicts whose action has no dedicated template.
pub const GENERIC_ML_NOTICE: &str = "Por favor, evita contenido no permitido.";
pub const LENGTH_NOTICE: &str = "Mensaje demasiado largo.";
pub const FLOOD_NOTICE: &str = "Antiflood: mute temporal.";
pub const CAPS_NOTICE: &str = "Evita escribir en MAYÚSCULAS.";
pub const LINKS_NOTICE: &str = "Enlaces no permitidos.";

/// Substitutes `{key}` placeholders in a custom message template.
/// Placeholders without a value are left verbatim so a typo in the
/// rules file degrades visibly instead of erasing text.
pub fn render(template: &str, values: &[(&str, String)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in values {
        rendered = rendered.replace(&format!("{{{}}}", key), value);
    }
    rendered
}

/// Trims an optional text and drops it entirely when blank.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

pub fn default_warn_text(user: &str) -> String {
    format!("Advertencia {}: tu mensaje viola las reglas.", user)
}

pub fn default_mute_text(user: &str, seconds: u64) -> String {
    format!("Usuario {} muteado por {} min.", user, seconds / 60)
}

pub fn default_kick_text(user: &str) -> String {
    format!("Usuario {} será expulsado del grupo.", user)
}

pub fn default_ban_text(user: &str, ban_seconds: u64) -> String {
    if ban_seconds > 0 {
        format!("Usuario {} será baneado por {} h.", user, ban_seconds / 3600)
    } else {
        format!("Usuario {} será baneado permanentemente.", user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_known_placeholders() {
        let text = render(
            "Hola {user}, mute de {minutes} min",
            &[("user", "@ana".to_string()), ("minutes", "10".to_string())],
        );
        assert_eq!(text, "Hola @ana, mute de 10 min");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders_verbatim() {
        let text = render("Aviso {user} numero {n}", &[("user", "@ana".to_string())]);
        assert_eq!(text, "Aviso @ana numero {n}");
    }

    #[test]
    fn test_render_replaces_repeated_placeholders() {
        let text = render("{user} y {user}", &[("user", "@bo".to_string())]);
        assert_eq!(text, "@bo y @bo");
    }

    #[test]
    fn test_non_blank_trims_and_filters() {
        assert_eq!(non_blank(Some("  hola  ")), Some("hola"));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(Some("")), None);
        assert_eq!(non_blank(None), None);
    }

    #[test]
    fn test_default_ban_text_distinguishes_permanent() {
        assert_eq!(
            default_ban_text("@ana", 7200),
            "Usuario @ana será baneado por 2 h."
        );
        assert_eq!(
            default_ban_text("@ana", 0),
            "Usuario @ana será baneado permanentemente."
        );
    }
}
