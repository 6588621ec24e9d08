pub mod spotdl_downloader;

pub use spotdl_downloader::SpotdlDownloader;
