pub mod create_csv;
pub mod landing;
pub mod utils;
