mod authentication;
mod backup;
mod site_usage;
