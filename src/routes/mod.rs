pub mod audit;
pub mod auth;
pub mod dependencies;
pub mod health;
pub mod members;
pub mod orgs;
pub mod project_teams;
pub mod projects;
pub mod tasks;
pub mod teams;
pub mod transactions;
pub mod work_logs;
