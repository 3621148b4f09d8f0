pub mod onnx_yolo_face_detector;
