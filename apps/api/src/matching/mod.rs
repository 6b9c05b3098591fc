pub mod city_picker;
pub mod handlers;
pub mod models;
pub mod processor;
pub mod relevance;
