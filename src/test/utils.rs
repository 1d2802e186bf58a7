#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::config::DEFAULT_ADMIN_EMAIL;
    use crate::db::{create_grade, create_section, create_user, insert_schedule};
    use crate::error::AppError;
    use crate::models::Shift;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::sync::Once;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";
    pub static ADMIN_EMAIL: &str = DEFAULT_ADMIN_EMAIL;

    pub fn init_test_logging() {
        INIT.call_once(|| {
            let _ = env_logger::builder()
                .parse_filters("debug")
                .is_test(true)
                .try_init();
        });
    }

    /// A single connection that never idles out, so the in-memory database
    /// lives as long as the pool.
    pub async fn memory_pool() -> Result<Pool<Sqlite>, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(pool)
    }

    struct TestUser {
        email: String,
        role: Role,
    }

    struct TestSection {
        grade: String,
        shift: Shift,
        name: String,
    }

    struct TestSchedule {
        grade: String,
        shift: Shift,
        section: String,
        image_url: String,
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        grades: Vec<(String, Shift)>,
        sections: Vec<TestSection>,
        schedules: Vec<TestSchedule>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn admin(mut self, email: &str) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                role: Role::Admin,
            });
            self
        }

        pub fn user(mut self, email: &str) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                role: Role::User,
            });
            self
        }

        pub fn grade(mut self, name: &str, shift: Shift) -> Self {
            self.grades.push((name.to_string(), shift));
            self
        }

        pub fn section(mut self, grade: &str, shift: Shift, name: &str) -> Self {
            self.sections.push(TestSection {
                grade: grade.to_string(),
                shift,
                name: name.to_string(),
            });
            self
        }

        pub fn schedule(mut self, grade: &str, shift: Shift, section: &str, image_url: &str) -> Self {
            self.schedules.push(TestSchedule {
                grade: grade.to_string(),
                shift,
                section: section.to_string(),
                image_url: image_url.to_string(),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            init_test_logging();
            let pool = memory_pool().await?;

            let mut db = TestDb {
                pool,
                user_ids: HashMap::new(),
                grade_ids: HashMap::new(),
                section_ids: HashMap::new(),
            };

            for user in &self.users {
                let id = create_user(&db.pool, &user.email, STANDARD_PASSWORD, user.role).await?;
                db.user_ids.insert(user.email.clone(), id);
            }

            for (name, shift) in &self.grades {
                let grade = create_grade(&db.pool, name, *shift).await?;
                db.grade_ids.insert((name.clone(), *shift), grade.id);
            }

            for section in &self.sections {
                let grade_id = db.require_grade(&section.grade, section.shift)?;
                let created = create_section(&db.pool, &grade_id, &section.name).await?;
                db.section_ids
                    .insert((grade_id, section.name.clone()), created.id);
            }

            for schedule in &self.schedules {
                let grade_id = db.require_grade(&schedule.grade, schedule.shift)?;
                let section_id = db
                    .section_ids
                    .get(&(grade_id.clone(), schedule.section.clone()))
                    .cloned()
                    .ok_or_else(|| AppError::NotFound(schedule.section.clone()))?;
                insert_schedule(&db.pool, &grade_id, &section_id, &schedule.image_url).await?;
            }

            Ok(db)
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        user_ids: HashMap<String, String>,
        grade_ids: HashMap<(String, Shift), String>,
        section_ids: HashMap<(String, String), String>,
    }

    impl TestDb {
        fn require_grade(&self, name: &str, shift: Shift) -> Result<String, AppError> {
            self.grade_id(name, shift)
                .ok_or_else(|| AppError::NotFound(format!("{} ({})", name, shift)))
        }

        pub fn user_id(&self, email: &str) -> Option<String> {
            self.user_ids.get(email).cloned()
        }

        pub fn grade_id(&self, name: &str, shift: Shift) -> Option<String> {
            self.grade_ids.get(&(name.to_string(), shift)).cloned()
        }

        pub fn section_id(&self, grade: &str, shift: Shift, name: &str) -> Option<String> {
            let grade_id = self.grade_id(grade, shift)?;
            self.section_ids.get(&(grade_id, name.to_string())).cloned()
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::test_db::{ADMIN_EMAIL, STANDARD_PASSWORD, TestDb, TestDbBuilder};
    use crate::config::{AdminPolicyKind, AppConfig, PlatformConfig};
    use crate::init_rocket;
    use crate::models::Shift;
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::{Client, LocalResponse};
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    pub const ANON_KEY: &str = "test-anon-key";
    pub const SERVICE_KEY: &str = "test-service-key";
    pub const PLATFORM_URL: &str = "http://localhost:8000";
    pub const BOUNDARY: &str = "timetable-test-boundary";

    pub fn test_config(storage_dir: &Path) -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            storage_dir: storage_dir.to_path_buf(),
            seed_catalog: false,
            admin_email: ADMIN_EMAIL.to_string(),
            admin_password: None,
            admin_policy: AdminPolicyKind::Email,
            platform: PlatformConfig {
                url: PLATFORM_URL.to_string(),
                anon_key: ANON_KEY.to_string(),
                service_key: SERVICE_KEY.to_string(),
            },
        }
    }

    pub struct TestApp {
        pub client: Client,
        pub db: TestDb,
        pub storage: TempDir,
    }

    impl TestApp {
        pub fn stored_objects(&self) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(self.storage.path())
                .map(|entries| {
                    entries
                        .filter_map(Result::ok)
                        .map(|entry| entry.file_name().to_string_lossy().into_owned())
                        .filter(|name| !name.starts_with('.'))
                        .collect()
                })
                .unwrap_or_default();
            names.sort();
            names
        }
    }

    pub async fn setup_test_client(db: TestDb) -> TestApp {
        let storage = tempfile::tempdir().expect("Failed to create storage dir");
        let config = test_config(storage.path());
        let rocket = init_rocket(db.pool.clone(), config).await;
        let client = Client::tracked(rocket)
            .await
            .expect("Failed to build rocket client");

        TestApp {
            client,
            db,
            storage,
        }
    }

    /// An administrator, a regular user and a small two-shift catalog.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .admin(ADMIN_EMAIL)
            .user("teacher@mohamedalfateh.edu")
            .grade("الأول", Shift::A)
            .grade("الثاني", Shift::A)
            .grade("الأول", Shift::B)
            .section("الأول", Shift::A, "أ")
            .section("الأول", Shift::A, "ب")
            .section("الثاني", Shift::A, "أ")
            .section("الأول", Shift::B, "أ")
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub async fn login_test_user<'c>(client: &'c Client, email: &str, password: &str) -> LocalResponse<'c> {
        client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(json!({ "email": email, "password": password }).to_string())
            .dispatch()
            .await
    }

    pub async fn login_admin(client: &Client) {
        let response = login_test_user(client, ADMIN_EMAIL, STANDARD_PASSWORD).await;
        assert_eq!(response.status(), Status::Ok, "Administrator login failed");
    }

    pub fn anon_key() -> Header<'static> {
        Header::new("apikey", ANON_KEY)
    }

    pub fn multipart_body(field: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    pub fn multipart_content_type() -> ContentType {
        ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY))
    }

    pub async fn upload_schedule<'c>(
        client: &'c Client,
        grade_id: &str,
        section_id: &str,
        object_name: &str,
        bytes: &[u8],
    ) -> LocalResponse<'c> {
        client
            .post("/api/upload-schedule")
            .header(multipart_content_type())
            .header(Header::new("X-File-Name", object_name.to_string()))
            .header(Header::new("X-Grade", grade_id.to_string()))
            .header(Header::new("X-Section", section_id.to_string()))
            .body(multipart_body("file", object_name, "image/png", bytes))
            .dispatch()
            .await
    }
}
