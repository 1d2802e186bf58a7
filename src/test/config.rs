#[cfg(test)]
mod tests {
    use crate::auth::{AdminPolicy, Role, User, is_admin};
    use crate::config::{AdminPolicyKind, AppConfig, DEFAULT_ADMIN_EMAIL};
    use chrono::Utc;
    use serial_test::serial;

    const CONFIG_VARS: [&str; 6] = [
        "ROCKET_DATABASE_URL",
        "ROCKET_STORAGE_DIR",
        "ROCKET_SEED_CATALOG",
        "ROCKET_ADMIN_EMAIL",
        "ROCKET_ADMIN_POLICY",
        "ROCKET_PLATFORM",
    ];

    fn extract_with(vars: &[(&str, &str)]) -> AppConfig {
        let mut overrides: Vec<(&str, Option<&str>)> =
            CONFIG_VARS.iter().map(|name| (*name, None)).collect();
        for (name, value) in vars {
            overrides.retain(|(existing, _)| existing != name);
            overrides.push((*name, Some(*value)));
        }

        temp_env::with_vars(overrides, || {
            AppConfig::from_figment(&rocket::Config::figment()).expect("config should extract")
        })
    }

    fn user(email: &str, role: Role) -> User {
        User {
            id: "u1".to_string(),
            email: email.to_string(),
            role,
            created_at: Utc::now(),
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_environment() {
        let config = extract_with(&[]);

        assert_eq!(config.admin_email, DEFAULT_ADMIN_EMAIL);
        assert_eq!(config.admin_policy, AdminPolicyKind::Email);
        assert!(!config.seed_catalog);
        assert!(config.validate().is_err(), "keys are required");
    }

    #[test]
    #[serial]
    fn test_reads_platform_and_policy_from_environment() {
        let config = extract_with(&[
            ("ROCKET_SEED_CATALOG", "true"),
            ("ROCKET_ADMIN_POLICY", "role"),
            ("ROCKET_STORAGE_DIR", "/tmp/schedules"),
            (
                "ROCKET_PLATFORM",
                "{url=\"https://timetables.example\",anon_key=\"anon\",service_key=\"service\"}",
            ),
        ]);

        assert!(config.seed_catalog);
        assert_eq!(config.admin_policy(), AdminPolicy::Role);
        assert_eq!(config.storage_dir.to_str(), Some("/tmp/schedules"));
        assert_eq!(config.platform.url, "https://timetables.example");
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_identical_keys_are_rejected() {
        let config = extract_with(&[(
            "ROCKET_PLATFORM",
            "{url=\"http://localhost:8000\",anon_key=\"same\",service_key=\"same\"}",
        )]);

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_email_policy_ignores_role_and_case() {
        let policy = AdminPolicy::Email(DEFAULT_ADMIN_EMAIL.to_string());

        assert!(is_admin(&user("Admin@MohamedAlfateh.edu", Role::User), &policy));
        assert!(!is_admin(&user("teacher@mohamedalfateh.edu", Role::Admin), &policy));
    }

    #[test]
    fn test_role_policy_uses_stored_role() {
        assert!(is_admin(&user("anyone@example.com", Role::Admin), &AdminPolicy::Role));
        assert!(!is_admin(&user(DEFAULT_ADMIN_EMAIL, Role::User), &AdminPolicy::Role));
    }
}
