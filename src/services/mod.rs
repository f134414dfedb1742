pub mod calendar;
pub mod catalog;
pub mod notifications;
pub mod selection_store;
pub mod timetable;
pub mod users;


#[cfg(test)]
#[path = "selection_store_test.rs"]
mod selection_store_test;

#[cfg(test)]
#[path = "catalog_test.rs"]
mod catalog_test;



#[cfg(test)]
#[path = "users_test.rs"]
mod users_test;
