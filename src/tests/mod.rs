mod fixtures;
mod class_end_to_end;
