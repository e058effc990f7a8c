use actix_web::web;

mod get_file;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(get_file::get_file_v1);
}
