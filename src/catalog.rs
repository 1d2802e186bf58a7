use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::db::{get_grades_by_shift, get_sections_for_grades};
use crate::error::AppError;
use crate::models::{Grade, Section, Shift};

/// Pedagogical order of the six grade names.
pub const GRADE_ORDER: [&str; 6] = ["الأول", "الثاني", "الثالث", "الرابع", "الخامس", "السادس"];

/// Grades of one shift in display order, with their sections keyed by grade id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub shift: Shift,
    pub grades: Vec<Grade>,
    pub sections: BTreeMap<String, Vec<Section>>,
    pub fallback: bool,
}

impl Catalog {
    pub fn sections_for(&self, grade_id: &str) -> &[Section] {
        self.sections
            .get(grade_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Position of `name` in [`GRADE_ORDER`]. Unknown names get -1 and therefore
/// sort ahead of every canonical grade.
pub fn grade_rank(name: &str) -> i32 {
    GRADE_ORDER
        .iter()
        .position(|candidate| *candidate == name)
        .map(|index| index as i32)
        .unwrap_or(-1)
}

pub fn sort_grades(grades: &mut [Grade]) {
    grades.sort_by_key(|grade| grade_rank(&grade.name));
}

/// Groups sections under their grade id, each group ordered by the raw name.
pub fn group_sections(sections: Vec<Section>) -> BTreeMap<String, Vec<Section>> {
    let mut grouped: BTreeMap<String, Vec<Section>> = BTreeMap::new();
    for section in sections {
        grouped
            .entry(section.grade_id.clone())
            .or_default()
            .push(section);
    }

    for group in grouped.values_mut() {
        group.sort_by(|a, b| a.name.cmp(&b.name));
    }

    grouped
}

struct SeedGrade {
    id: &'static str,
    name: &'static str,
    // (section id, section name), indexed by `Shift::index`
    sections: [&'static [(&'static str, &'static str)]; 2],
}

const SEED_CATALOG: [SeedGrade; 6] = [
    SeedGrade {
        id: "1",
        name: "الأول",
        sections: [&[("1-1", "أ")], &[("1-1", "أ")]],
    },
    SeedGrade {
        id: "2",
        name: "الثاني",
        sections: [&[("2-1", "أ"), ("2-2", "ب")], &[("2-2", "ب")]],
    },
    SeedGrade {
        id: "3",
        name: "الثالث",
        sections: [&[("3-1", "أ"), ("3-2", "ب")], &[("3-1", "أ")]],
    },
    SeedGrade {
        id: "4",
        name: "الرابع",
        sections: [&[("4-1", "أ")], &[("4-1", "أ"), ("4-2", "ب")]],
    },
    SeedGrade {
        id: "5",
        name: "الخامس",
        sections: [&[("5-1", "أ"), ("5-2", "ب"), ("5-3", "ج")], &[("5-1", "أ"), ("5-2", "ب")]],
    },
    SeedGrade {
        id: "6",
        name: "السادس",
        sections: [&[("6-1", "أ"), ("6-2", "ب")], &[("6-1", "أ"), ("6-2", "ب")]],
    },
];

/// Static catalog shown when the real one cannot be fetched.
pub fn fallback_catalog(shift: Shift) -> Catalog {
    let now = Utc::now();

    let grades = SEED_CATALOG
        .iter()
        .map(|seed| Grade {
            id: seed.id.to_string(),
            name: seed.name.to_string(),
            shift,
            created_at: now,
        })
        .collect();

    let sections = SEED_CATALOG
        .iter()
        .flat_map(|seed| {
            seed.sections[shift.index()]
                .iter()
                .map(move |(id, name)| Section {
                    id: id.to_string(),
                    name: name.to_string(),
                    grade_id: seed.id.to_string(),
                    created_at: now,
                })
        })
        .collect();

    Catalog {
        shift,
        grades,
        sections: group_sections(sections),
        fallback: true,
    }
}

#[instrument(skip(pool))]
pub async fn fetch_catalog(pool: &Pool<Sqlite>, shift: Shift) -> Result<Catalog, AppError> {
    let mut grades = get_grades_by_shift(pool, shift).await?;
    sort_grades(&mut grades);

    let grade_ids: Vec<String> = grades.iter().map(|grade| grade.id.clone()).collect();
    let sections = if grade_ids.is_empty() {
        Vec::new()
    } else {
        get_sections_for_grades(pool, &grade_ids).await?
    };

    Ok(Catalog {
        shift,
        grades,
        sections: group_sections(sections),
        fallback: false,
    })
}

/// Never fails: any fetch error swaps in [`fallback_catalog`].
#[instrument(skip(pool))]
pub async fn load_catalog(pool: &Pool<Sqlite>, shift: Shift) -> Catalog {
    match fetch_catalog(pool, shift).await {
        Ok(catalog) => {
            info!(grades = catalog.grades.len(), "Loaded catalog");
            catalog
        }
        Err(err) => {
            err.log_and_record("Loading catalog, serving fallback");
            fallback_catalog(shift)
        }
    }
}
