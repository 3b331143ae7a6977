pub mod u504_import_from_wildberries;
pub mod u505_send_to_site;
