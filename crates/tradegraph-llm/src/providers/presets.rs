use std::collections::HashMap;

/// A named provider preset for OpenAI-compatible APIs.
pub struct ProviderPreset {
    pub default_base_url: &'static str,
    pub needs_api_key: bool,
    pub extra_headers: &'static [(&'static str, &'static str)],
}

/// Look up a provider preset by name.
pub fn get_preset(provider: &str) -> Option<ProviderPreset> {
    let (default_base_url, needs_api_key, extra_headers): (_, _, &'static [_]) = match provider {
        "openai" => ("https://api.openai.com/v1/chat/completions", true, &[]),
        "ollama" => ("http://localhost:11434/v1/chat/completions", false, &[]),
        "groq" => ("https://api.groq.com/openai/v1/chat/completions", true, &[]),
        "openrouter" => (
            "https://openrouter.ai/api/v1/chat/completions",
            true,
            &[("X-Title", "tradegraph")],
        ),
        "together" => ("https://api.together.xyz/v1/chat/completions", true, &[]),
        "deepseek" => ("https://api.deepseek.com/v1/chat/completions", true, &[]),
        "xai" => ("https://api.x.ai/v1/chat/completions", true, &[]),
        _ => return None,
    };
    Some(ProviderPreset {
        default_base_url,
        needs_api_key,
        extra_headers,
    })
}

/// Build extra headers from a preset + user config overrides.
pub fn build_extra_headers(
    preset: &ProviderPreset,
    user_headers: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = preset
        .extra_headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    for (k, v) in user_headers {
        // User overrides take precedence
        if let Some(pos) = headers.iter().position(|(hk, _)| hk == k) {
            headers[pos].1 = v.clone();
        } else {
            headers.push((k.clone(), v.clone()));
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_headers_override_preset() {
        let preset = get_preset("openrouter").unwrap();
        let mut user = HashMap::new();
        user.insert("X-Title".to_string(), "desk".to_string());
        user.insert("X-Env".to_string(), "paper".to_string());

        let mut headers = build_extra_headers(&preset, &user);
        headers.sort();
        assert_eq!(
            headers,
            vec![
                ("X-Env".to_string(), "paper".to_string()),
                ("X-Title".to_string(), "desk".to_string()),
            ]
        );
    }

    #[test]
    fn test_local_preset_needs_no_key() {
        assert!(!get_preset("ollama").unwrap().needs_api_key);
        assert!(get_preset("anthropic").is_none());
    }
}
