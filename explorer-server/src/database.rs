//! Demo schema for trying the explorer against SQLite

use sqlx::sqlite::SqlitePool;

pub async fn setup(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(
        r#"
        CREATE TABLE IF NOT EXISTS investors (
            investor_id INTEGER PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT UNIQUE,
            joined_on DATE,
            active BOOLEAN NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS companies (
            company_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            founded_on DATE
        );

        CREATE TABLE IF NOT EXISTS investments (
            investment_id INTEGER PRIMARY KEY,
            investor_id INTEGER NOT NULL REFERENCES investors(investor_id),
            company_id INTEGER NOT NULL REFERENCES companies(company_id),
            amount REAL NOT NULL CHECK (amount > 0),
            invested_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (investor_id, company_id)
        );

        CREATE TABLE IF NOT EXISTS young_people (
            young_person_id INTEGER PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            born_on DATE
        );

        CREATE TABLE IF NOT EXISTS projects (
            project_id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            leader_id INTEGER REFERENCES young_people(young_person_id),
            started_at DATETIME
        );

        CREATE VIEW IF NOT EXISTS investment_totals AS
            SELECT company_id, COUNT(*) AS investments, SUM(amount) AS total
            FROM investments
            GROUP BY company_id;
        "#,
    )
    .execute(pool)
    .await?;

    seed_sample_data(pool).await
}

async fn seed_sample_data(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let investor_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM investors")
        .fetch_one(pool)
        .await?;

    if investor_count.0 > 0 {
        // Data already seeded
        return Ok(());
    }

    let first_names = ["Ann", "Bo", "Cy", "Dana", "Eli", "Fay", "Gus", "Hal", "Ida", "Jo"];
    let last_names = ["Lee", "Park", "Ng", "Ortiz", "Stone", "Meyer", "Quist", "Reyes"];

    for index in 0..40 {
        let first = first_names[index % first_names.len()];
        let last = last_names[index % last_names.len()];
        sqlx::query(
            "INSERT INTO investors (first_name, last_name, email, joined_on, active) VALUES (?, ?, ?, date('2024-01-01', ?), ?)",
        )
        .bind(first)
        .bind(last)
        .bind(format!("{}.{}{}@example.com", first.to_lowercase(), last.to_lowercase(), index))
        .bind(format!("+{} days", index * 3))
        .bind(index % 6 != 0)
        .execute(pool)
        .await?;
    }

    let companies = ["Acme", "Globex", "Initech", "Umbrella", "Hooli", "Vandelay", "Stark", "Wonka"];
    for (index, name) in companies.iter().enumerate() {
        sqlx::query("INSERT INTO companies (name, description, founded_on) VALUES (?, ?, date('1990-01-01', ?))")
            .bind(*name)
            .bind(format!("{} holdings", name))
            .bind(format!("+{} years", index * 4))
            .execute(pool)
            .await?;
    }

    for index in 0..120 {
        let investor_id = (index % 40) + 1;
        let company_id = (index / 40 + index) % companies.len() + 1;
        sqlx::query(
            "INSERT INTO investments (investor_id, company_id, amount, invested_at) VALUES (?, ?, ?, datetime('2024-03-01 09:00:00', ?))",
        )
        .bind(investor_id as i64)
        .bind(company_id as i64)
        .bind(1000.0 + (index as f64) * 250.0)
        .bind(format!("+{} hours", index * 7))
        .execute(pool)
        .await?;
    }

    for index in 0..12 {
        sqlx::query("INSERT INTO young_people (first_name, last_name, born_on) VALUES (?, ?, date('2008-06-01', ?))")
            .bind(first_names[index % first_names.len()])
            .bind(last_names[(index + 3) % last_names.len()])
            .bind(format!("+{} days", index * 45))
            .execute(pool)
            .await?;
    }

    for index in 0..6 {
        sqlx::query("INSERT INTO projects (title, leader_id, started_at) VALUES (?, ?, datetime('2024-02-01 10:00:00', ?))")
            .bind(format!("Project {}", index + 1))
            .bind((index * 2 + 1) as i64)
            .bind(format!("+{} days", index * 5))
            .execute(pool)
            .await?;
    }

    tracing::info!("Demo data seeded: 40 investors, 8 companies, 120 investments, 12 young people, 6 projects");
    Ok(())
}
