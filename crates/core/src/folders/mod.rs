pub mod folder_synchronizer;
