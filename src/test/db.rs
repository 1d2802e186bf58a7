#[cfg(test)]
mod tests {
    use crate::auth::Role;
    use crate::db::{
        create_grade, create_section, create_user, delete_grade, delete_schedule, delete_section,
        find_schedule, find_user_by_email, get_all_schedules, get_grades_by_shift, get_stats,
        insert_schedule, update_schedule_image, upsert_admin_user,
    };
    use crate::error::AppError;
    use crate::models::Shift;
    use crate::schedule::{ScheduleLookup, resolve_schedule};
    use crate::seed::seed_catalog;
    use crate::test::test_db::{TestDbBuilder, memory_pool};
    use rocket::tokio;

    #[tokio::test]
    async fn test_find_user_by_email_ignores_case() {
        let pool = memory_pool().await.expect("Failed to create database");

        create_user(&pool, "Teacher@School.edu", "password123", Role::User)
            .await
            .expect("Failed to create user");

        let user = find_user_by_email(&pool, "teacher@school.edu")
            .await
            .expect("Failed to look up user");

        match user {
            Some(user) => assert_eq!(user.role, Role::User),
            _ => panic!("User should be found regardless of case"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_user_is_a_conflict() {
        let pool = memory_pool().await.expect("Failed to create database");

        create_user(&pool, "a@b.edu", "pw", Role::User)
            .await
            .expect("Failed to create user");
        let result = create_user(&pool, "a@b.edu", "pw", Role::User).await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_upsert_admin_promotes_existing_user() {
        let pool = memory_pool().await.expect("Failed to create database");

        let original = create_user(&pool, "head@school.edu", "old", Role::User)
            .await
            .expect("Failed to create user");
        let upserted = upsert_admin_user(&pool, "head@school.edu", "new-password")
            .await
            .expect("Failed to upsert admin");

        assert_eq!(original, upserted);
        let user = find_user_by_email(&pool, "head@school.edu")
            .await
            .expect("Failed to look up user")
            .expect("User exists");
        assert_eq!(user.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_duplicate_grade_in_same_shift_conflicts() {
        let pool = memory_pool().await.expect("Failed to create database");

        create_grade(&pool, "الأول", Shift::A)
            .await
            .expect("Failed to create grade");
        create_grade(&pool, "الأول", Shift::B)
            .await
            .expect("Same name in the other shift is allowed");

        let result = create_grade(&pool, " الأول ", Shift::A).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let morning = get_grades_by_shift(&pool, Shift::A)
            .await
            .expect("Failed to list grades");
        assert_eq!(morning.len(), 1);
    }

    #[tokio::test]
    async fn test_section_requires_existing_grade() {
        let pool = memory_pool().await.expect("Failed to create database");

        let result = create_section(&pool, "missing-grade", "أ").await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_deleting_grade_cascades() {
        let test_db = TestDbBuilder::new()
            .grade("الأول", Shift::A)
            .section("الأول", Shift::A, "أ")
            .section("الأول", Shift::A, "ب")
            .schedule("الأول", Shift::A, "أ", "http://localhost:8000/x/1-1.png")
            .build()
            .await
            .expect("Failed to build test database");

        let grade_id = test_db.grade_id("الأول", Shift::A).expect("grade exists");
        let section_id = test_db
            .section_id("الأول", Shift::A, "أ")
            .expect("section exists");

        assert!(resolve_schedule(&test_db.pool, &grade_id, &section_id).await.is_available());

        delete_grade(&test_db.pool, &grade_id)
            .await
            .expect("Failed to delete grade");

        let stats = get_stats(&test_db.pool).await.expect("Failed to get stats");
        assert_eq!(stats.total_grades, 0);
        assert_eq!(stats.total_sections, 0);
        assert_eq!(stats.total_schedules, 0);
        assert_eq!(
            resolve_schedule(&test_db.pool, &grade_id, &section_id).await,
            ScheduleLookup::NotAvailable
        );
    }

    #[tokio::test]
    async fn test_deleting_section_removes_its_schedule_only() {
        let test_db = TestDbBuilder::new()
            .grade("الثاني", Shift::B)
            .section("الثاني", Shift::B, "أ")
            .section("الثاني", Shift::B, "ب")
            .schedule("الثاني", Shift::B, "أ", "http://localhost:8000/x/a.png")
            .schedule("الثاني", Shift::B, "ب", "http://localhost:8000/x/b.png")
            .build()
            .await
            .expect("Failed to build test database");

        let section_id = test_db
            .section_id("الثاني", Shift::B, "أ")
            .expect("section exists");
        delete_section(&test_db.pool, &section_id)
            .await
            .expect("Failed to delete section");

        let remaining = get_all_schedules(&test_db.pool)
            .await
            .expect("Failed to list schedules");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].image_url.as_deref(), Some("http://localhost:8000/x/b.png"));

        let again = delete_section(&test_db.pool, &section_id).await;
        assert!(matches!(again, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_schedule_image_moves_updated_at() {
        let test_db = TestDbBuilder::new()
            .grade("الأول", Shift::A)
            .section("الأول", Shift::A, "أ")
            .build()
            .await
            .expect("Failed to build test database");

        let grade_id = test_db.grade_id("الأول", Shift::A).expect("grade exists");
        let section_id = test_db
            .section_id("الأول", Shift::A, "أ")
            .expect("section exists");

        let inserted = insert_schedule(&test_db.pool, &grade_id, &section_id, "http://h/first.png")
            .await
            .expect("Failed to insert schedule");
        assert_eq!(inserted.created_at, inserted.updated_at);

        let updated = update_schedule_image(&test_db.pool, inserted.clone(), "http://h/second.png")
            .await
            .expect("Failed to update schedule");

        let stored = find_schedule(&test_db.pool, &grade_id, &section_id)
            .await
            .expect("Failed to find schedule")
            .expect("Schedule exists");

        assert_eq!(stored.id, inserted.id);
        assert_eq!(stored.image_url.as_deref(), Some("http://h/second.png"));
        assert!(stored.updated_at >= stored.created_at);
        assert_eq!(stored.updated_at, updated.updated_at);
    }

    #[tokio::test]
    async fn test_seed_catalog_is_idempotent() {
        let pool = memory_pool().await.expect("Failed to create database");

        let first = seed_catalog(&pool).await.expect("Failed to seed");
        let second = seed_catalog(&pool).await.expect("Failed to reseed");
        assert_eq!(first, second);

        let stats = get_stats(&pool).await.expect("Failed to get stats");
        assert_eq!(stats.total_grades, 12);
        assert_eq!(stats.total_sections, 36);
        assert_eq!(stats.last_update, None);
    }

    #[tokio::test]
    async fn test_update_of_deleted_schedule_is_not_found() {
        let test_db = TestDbBuilder::new()
            .grade("الأول", Shift::A)
            .section("الأول", Shift::A, "أ")
            .schedule("الأول", Shift::A, "أ", "http://h/first.png")
            .build()
            .await
            .expect("Failed to build test database");

        let grade_id = test_db.grade_id("الأول", Shift::A).expect("grade exists");
        let section_id = test_db
            .section_id("الأول", Shift::A, "أ")
            .expect("section exists");
        let looked_up = find_schedule(&test_db.pool, &grade_id, &section_id)
            .await
            .expect("Failed to find schedule")
            .expect("Schedule exists");

        delete_schedule(&test_db.pool, &looked_up.id)
            .await
            .expect("Failed to delete schedule");

        let result = update_schedule_image(&test_db.pool, looked_up, "http://h/second.png").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(get_all_schedules(&test_db.pool).await.expect("list").is_empty());
    }
}

