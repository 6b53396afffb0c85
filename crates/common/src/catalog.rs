//! Static academic catalog: departments, semesters and default subjects

use validator::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Department {
    pub code: &'static str,
    pub name: &'static str,
}

pub const DEPARTMENTS: &[Department] = &[
    Department { code: "cs", name: "Computer Science" },
    Department { code: "is", name: "Information Science" },
    Department { code: "ec", name: "Electronics & Comm" },
    Department { code: "me", name: "Mechanical" },
    Department { code: "rb", name: "Robotics" },
    Department { code: "ai", name: "AI & ML" },
    Department { code: "mba", name: "MBA" },
    Department { code: "fy", name: "First Year" },
];

pub const SEMESTERS: std::ops::RangeInclusive<u8> = 1..=8;

/// Default subjects keyed by department and semester
const SUBJECTS: &[(&str, u8, &[&str])] = &[
    (
        "cs",
        3,
        &["Data Structures", "Digital Electronics", "COA", "Discrete Math", "Unix Shell Programming"],
    ),
    (
        "cs",
        4,
        &["Algorithms", "Operating Systems", "Microprocessors", "OOC", "Data Comm"],
    ),
    (
        "cs",
        5,
        &["DBMS", "Computer Networks", "ATC", "Python", "Management"],
    ),
];

pub fn is_known_department(code: &str) -> bool {
    DEPARTMENTS.iter().any(|d| d.code == code)
}

pub fn department(code: &str) -> Option<&'static Department> {
    DEPARTMENTS.iter().find(|d| d.code == code)
}

/// Configured subjects for a department/semester, empty when none are listed
pub fn static_subjects(department: &str, semester: u8) -> &'static [&'static str] {
    SUBJECTS
        .iter()
        .find(|(d, s, _)| *d == department && *s == semester)
        .map(|(_, _, subjects)| *subjects)
        .unwrap_or(&[])
}

/// `validator` hook for department codes
pub fn validate_department(code: &str) -> Result<(), ValidationError> {
    if is_known_department(code) {
        Ok(())
    } else {
        Err(ValidationError::new("unknown_department"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_subjects() {
        assert_eq!(static_subjects("cs", 3).len(), 5);
        assert!(static_subjects("cs", 3).contains(&"COA"));
        assert!(static_subjects("me", 1).is_empty());
    }

    #[test]
    fn test_department_lookup() {
        assert_eq!(department("ec").map(|d| d.name), Some("Electronics & Comm"));
        assert!(validate_department("zz").is_err());
        assert!(validate_department("mba").is_ok());
        assert!(SEMESTERS.contains(&8));
    }
}
