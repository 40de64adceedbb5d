pub mod think;
pub mod web_search;
