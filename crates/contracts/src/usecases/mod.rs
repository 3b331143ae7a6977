pub mod u504_import_from_wildberries;
