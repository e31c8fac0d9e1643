use crate::core::config::data::Config;

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        match &self.backend_url {
            Some(url) => println!("  backend-url: {url}"),
            None => println!("  backend-url: (unset)"),
        }
        match &self.client_id {
            Some(id) => println!("  client-id: {id}"),
            None => println!("  client-id: (unset)"),
        }
        println!("  log-filter: {}", self.log_filter_or_default());
        println!("  request-timeout: {}s", self.request_timeout().as_secs());
    }
}
