pub mod db_utils;
pub mod geo;
pub mod image_data;
